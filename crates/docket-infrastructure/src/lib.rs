pub mod chat_api;
pub mod config_service;
pub mod loopback;
pub mod paths;
pub mod socket_io;

pub use crate::chat_api::HttpChatApi;
pub use crate::config_service::ConfigService;
pub use crate::loopback::{LoopbackConnector, LoopbackServer};
pub use crate::paths::DocketPaths;
pub use crate::socket_io::SocketIoConnector;
