pub mod server;

use self::server::Args;

#[derive(Debug)]
pub enum Action {
    Server(Box<Args>),
}
