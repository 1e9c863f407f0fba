use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info};

use autoresponder::channels::{ImapMailbox, Mailbox, ResendClient};
use autoresponder::config::Config;
use autoresponder::responder::{IgnoreList, Responder};
use autoresponder::state::StateStore;
use autoresponder::template::ResponseTemplate;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: MAILBOX_ADDRESS, MAILBOX_PASSWORD, RESEND_API_KEY");
        std::process::exit(1);
    });

    // The template is required before anything runs — init mode included.
    let template = ResponseTemplate::load(&config.template_path)
        .await
        .unwrap_or_else(|e| {
            eprintln!("Error: {e}");
            std::process::exit(1);
        });

    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(config.mailbox.clone()));
    let sender = Arc::new(ResendClient::new(
        &config.delivery,
        &config.mailbox.address,
        template,
    ));
    let store = StateStore::new(&config.state_path);
    let filters = IgnoreList::for_mailbox(&config.mailbox.address);

    // One-shot initialization: mark the current mailbox contents as
    // processed so the normal loop never replies to backlog.
    if std::env::args().nth(1).as_deref() == Some("--init") {
        let mut responder = Responder::new(
            mailbox,
            sender,
            store,
            filters,
            config.cooldown,
            Utc::now(),
        )
        .await;

        info!("Marking all current messages as processed");
        match responder.mark_all_processed().await {
            Ok(count) => {
                info!("Done — {count} message(s) marked. Run again without --init to start the loop");
            }
            Err(e) => {
                error!(error = %e, "Initialization failed");
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Only mail arriving after this instant is ever answered.
    let started_at = Utc::now();

    eprintln!("📬 Autoresponder v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}", config.mailbox.address);
    eprintln!(
        "   IMAP: {}:{}",
        config.mailbox.imap_host, config.mailbox.imap_port
    );
    eprintln!("   Poll interval: {}s", config.poll_interval.as_secs());
    eprintln!("   Cooldown: {}h", config.cooldown.as_secs() / 3600);
    eprintln!(
        "   Started: {} — replying only to mail after this time\n",
        started_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    let mut responder = Responder::new(
        mailbox,
        sender,
        store,
        filters,
        config.cooldown,
        started_at,
    )
    .await;

    // Short grace delay so messages on the startup boundary settle.
    tokio::time::sleep(Duration::from_secs(2)).await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = responder.poll_once() => {}
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    info!("Interrupt received, persisting state before exit");
    responder.persist().await;
    Ok(())
}
