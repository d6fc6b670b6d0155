use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("task tree already started")]
    AlreadyStarted,

    #[error("driver event channel disconnected")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, Error>;
