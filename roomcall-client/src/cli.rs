use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "roomcall",
    about = "Joins two local participants into a room and negotiates a call between them",
    author,
    version
)]
pub struct Cli {
    /// Room to join. A random room is used if omitted.
    pub room: Option<String>,

    /// Seconds to wait for both participants to connect.
    #[arg(long, env = "ROOMCALL_CONNECT_TIMEOUT")]
    pub connect_timeout: Option<u64>,

    /// Negotiate an audio instead of a video stream.
    #[arg(long)]
    pub audio: bool,
}
