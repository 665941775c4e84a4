//! Minimal control-socket client.
//!
//! ```sh
//! cargo run --example rpc_client -- /tmp/jobvisor/rpc.sock list
//! cargo run --example rpc_client -- /tmp/jobvisor/rpc.sock kill "demo.ticker SIGTERM"
//! ```

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use jobvisor::rpc::RpcRequest;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let (Some(socket), Some(method)) = (args.next(), args.next()) else {
        eprintln!("usage: rpc_client <socket> <method> [arg]");
        std::process::exit(2);
    };
    let request = RpcRequest {
        method,
        arg: args.next().unwrap_or_default(),
    };

    let mut stream = UnixStream::connect(&socket).await?;
    let mut buf = serde_json::to_vec(&request)?;
    buf.push(b'\n');
    stream.write_all(&buf).await?;

    let mut line = String::new();
    BufReader::new(&mut stream).read_line(&mut line).await?;
    println!("{}", line.trim());
    Ok(())
}
