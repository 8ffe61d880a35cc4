//! Establishes a Salesforce session from environment variables and runs a query.
//!
//! Reads `.env` if present. Set `SALESFORCE_CONNECTION_TYPE` to
//! `OAuth_2.0_Client_Credentials` to use the client-credentials grant,
//! otherwise username/password login is used.
//!
//! ```sh
//! RUST_LOG=salesforce_connect=debug cargo run --example connect
//! ```

use salesforce_connect::client::ErrorKind;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let session = match salesforce_connect::establish(None).await {
        Ok(session) => session,
        Err(e) if e.kind() == ErrorKind::Config => {
            error!("Configuration problem: {e}");
            return Err(e.into());
        }
        Err(e) => {
            error!("Salesforce rejected the connection: {e}");
            return Err(e.into());
        }
    };
    info!(
        "Connected to {} as {} (API v{}, {})",
        session.instance_url(),
        session.user_id().unwrap_or("unknown user"),
        session.api_version(),
        session.flow()
    );

    let accounts = session
        .query::<serde_json::Value>("SELECT Id, Name FROM Account ORDER BY Name LIMIT 5")
        .await?;
    info!("Found {} accounts", accounts.total_size);
    for account in &accounts.records {
        info!("{}", account["Name"]);
    }

    Ok(())
}
