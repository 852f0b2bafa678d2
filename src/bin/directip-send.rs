use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use directip_mux::protocol::{self, Message, SessionHeader};

#[derive(Parser)]
#[command(name = "directip-send")]
#[command(about = "Test client for a DirectIP receiver", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one mobile-originated message and print the confirmation
    Send {
        /// Receiver address
        #[arg(short, long, default_value = "127.0.0.1:2022")]
        server: String,

        /// Device IMEI (15 digits)
        #[arg(short, long)]
        imei: String,

        /// Payload text
        #[arg(short, long, default_value = "")]
        payload: String,

        /// MO sequence number
        #[arg(long, default_value_t = 0)]
        momsn: u16,

        /// Prefix the message with a PROXY v1 header for this source address
        #[arg(long)]
        proxy_source: Option<std::net::SocketAddr>,
    },
    /// Decode a captured binary message and print it as JSON
    Decode {
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Send {
            server,
            imei,
            payload,
            momsn,
            proxy_source,
        } => {
            let mut session = SessionHeader::for_imei(&imei);
            session.momsn = momsn;
            let mut message = Message::new().with_session(session);
            if !payload.is_empty() {
                message = message.with_payload(payload.into_bytes());
            }

            let mut stream = TcpStream::connect(&server).await?;
            if let Some(source) = proxy_source {
                let local = stream.local_addr()?;
                let family = if source.is_ipv4() { "TCP4" } else { "TCP6" };
                let header = format!(
                    "PROXY {family} {} {} {} {}\r\n",
                    source.ip(),
                    local.ip(),
                    source.port(),
                    local.port()
                );
                stream.write_all(header.as_bytes()).await?;
            }
            stream.write_all(&message.encode()?).await?;

            let reply = protocol::decode(&mut stream).await?;
            match reply.confirmation {
                Some(confirmation) if confirmation.is_accepted() => println!("accepted"),
                Some(_) => println!("rejected"),
                None => eprintln!("Error: reply carried no confirmation"),
            }
        }
        Commands::Decode { file } => {
            let bytes = std::fs::read(file)?;
            let message = protocol::parse(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&message)?);
        }
    }

    Ok(())
}
