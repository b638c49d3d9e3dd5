use clap::Parser;
use stomp_transport::AckMode;

#[derive(Parser)]
#[command(name = "stomp")]
#[command(version)]
#[command(about = "Interactive STOMP client CLI")]
pub struct Cli {
    /// STOMP broker address (host:port)
    #[arg(short, long, default_value = "127.0.0.1:61613")]
    pub address: String,

    /// Login username
    #[arg(short, long, default_value = "guest")]
    pub login: String,

    /// Passcode
    #[arg(short, long, default_value = "guest")]
    pub passcode: String,

    /// Virtual host sent in the CONNECT frame
    #[arg(long, default_value = "/")]
    pub vhost: String,

    /// Heartbeat settings (client-send,client-receive in ms)
    #[arg(long, default_value = "10000,10000")]
    pub heartbeat: String,

    /// Destinations to subscribe to (can be specified multiple times)
    #[arg(short, long)]
    pub subscribe: Vec<String>,

    /// Acknowledgement mode for subscriptions (auto, client, client-individual)
    #[arg(long)]
    pub ack: Option<AckMode>,

    /// Ask the broker to confirm every SEND
    #[arg(long)]
    pub receipts: bool,
}
