use std::env;
use std::error::Error;

use linkedin_messaging_sdk::auth::Credentials;
use linkedin_messaging_sdk::config::RealtimeOptions;
use linkedin_messaging_sdk::stream::client::RealtimeClient;
use linkedin_messaging_sdk::stream::controller::StreamNotice;
use linkedin_messaging_sdk::stream::event::Event;
use tracing_subscriber::EnvFilter;

fn credentials_from_env() -> Result<Credentials, Box<dyn Error>> {
    if let (Ok(li_at), Ok(jsession_id)) = (env::var("LINKEDIN_LI_AT"), env::var("LINKEDIN_JSESSIONID")) {
        return Ok(Credentials::cookies(li_at, jsession_id));
    }
    let email = env::var("LINKEDIN_EMAIL")?;
    let password = env::var("LINKEDIN_PASSWORD")?;
    Ok(Credentials::password(email, password))
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let credentials = credentials_from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let client = RealtimeClient::new(RealtimeOptions::default())?;
        let (_subscription, mut events) = client.subscribe_channel();
        let mut notices = client
            .take_notices()
            .ok_or("notice channel already taken")?;

        client.start(&credentials).await?;
        if let Some(session) = client.session() {
            println!("streaming as account_id={}", session.account_id());
        }

        loop {
            tokio::select! {
                Some(event) = events.recv() => match event {
                    Event::Message(message) => println!(
                        "message conversation={} from={} body={:?}",
                        message.header.conversation_id.as_deref().unwrap_or("-"),
                        message.sender_name.as_deref().unwrap_or("unknown"),
                        message.body,
                    ),
                    Event::Receipt(receipt) => {
                        println!("seen reader={} event={}", receipt.reader, receipt.seen_event)
                    }
                    Event::Presence(presence) => {
                        println!("typing actor={} conversation={}", presence.actor, presence.conversation)
                    }
                    other => println!("{:?} id={}", other.kind(), other.event_id()),
                },
                Some(notice) = notices.recv() => match notice {
                    StreamNotice::Fatal(fatal) => {
                        eprintln!("stream ended: {fatal}");
                        break;
                    }
                    other => eprintln!("notice: {other:?}"),
                },
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        client.stop();
        Ok::<(), Box<dyn Error>>(())
    })
}
