use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::context::DebugContext;
use crate::session::ClientSession;
use crate::Result;

/// Accept debugger clients forever, one task per connection.
pub async fn serve(listener: TcpListener, ctx: DebugContext) -> Result<()> {
    info!(addr = %listener.local_addr()?, "Accepting debugger clients");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!(%peer, "Failed to set TCP_NODELAY: {}", e);
                }
                let session = ClientSession::new(stream, ctx.clone(), peer.to_string());
                tokio::spawn(async move {
                    // Outcomes are logged by the session itself.
                    let _ = session.run().await;
                });
            }
            Err(e) => warn!("Failed to accept debugger client: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DebuggerConfig;
    use crate::protocol::{read_client_frame, write_client_frame};
    use crate::testing::harness;
    use serde_json::{json, Value};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_serves_clients_over_tcp() {
        let h = harness(DebuggerConfig::default()).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, h.ctx.clone()));

        for round in 0..2 {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            let command_id = format!("c{round}");
            write_client_frame(
                &mut stream,
                &json!({"commandId": command_id, "command": "viewBreakpoint"}),
            )
            .await
            .unwrap();
            let bytes = read_client_frame(&mut stream).await.unwrap().unwrap();
            let reply: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(reply["commandId"], command_id.as_str());
            assert_eq!(reply["breakpoints"], json!([]));
            assert!(read_client_frame(&mut stream).await.unwrap().is_none());
        }
    }
}
