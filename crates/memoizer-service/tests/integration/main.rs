mod compute;
mod init;
mod resolve;
mod sweep;
mod utils;
