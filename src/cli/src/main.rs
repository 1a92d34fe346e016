use std::env;
use std::io::Write as _;
use std::sync::Arc;

use mnemo_core::{BackendClient, ChatSession, MnemoConfig, SessionUpdate, TranscriptItem};
use mnemo_protocol::Role;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_filter())
        .init();

    let mut config = MnemoConfig::load().map_err(Box::<dyn std::error::Error>::from)?;
    if let Ok(url) = env::var("MNEMO_BACKEND_URL") {
        config.backend.base_url = url;
    }
    if let Ok(token) = env::var("MNEMO_ACCESS_TOKEN") {
        config.auth.access_token = Some(token);
    }
    if let Ok(token) = env::var("MNEMO_REFRESH_TOKEN") {
        config.auth.refresh_token = Some(token);
    }

    let client = Arc::new(BackendClient::new(&config.backend, &config.auth)?);

    let threads = client.list_threads().await?;
    let thread = match threads.into_iter().next() {
        Some(thread) => thread,
        None => {
            client
                .create_thread(&config.chat.default_thread_title)
                .await?
        }
    };
    tracing::info!(thread_id = %thread.thread_id, "attached to thread");

    let (session, mut updates) = ChatSession::new(
        client.clone(),
        thread.thread_id.clone(),
        config.chat.update_buffer,
    );
    let session = Arc::new(session);
    session.switch_thread(&thread.thread_id).await?;

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            render_update(&update);
        }
    });

    println!("mnemo. commands: /threads /new [title] /switch <id> /history /cancel /quit");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if let Some(rest) = line.strip_prefix('/') {
            let mut parts = rest.splitn(2, ' ');
            let command = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).unwrap_or_default();
            match command {
                "quit" | "exit" => break,
                "cancel" => session.cancel_processing(),
                "threads" => match client.list_threads().await {
                    Ok(threads) => {
                        for t in threads {
                            println!("  {}  {}", t.thread_id, t.title);
                        }
                    }
                    Err(e) => eprintln!("thread list failed: {e}"),
                },
                "new" => {
                    let title = if arg.is_empty() {
                        config.chat.default_thread_title.as_str()
                    } else {
                        arg
                    };
                    match client.create_thread(title).await {
                        Ok(t) => {
                            if let Err(e) = session.switch_thread(&t.thread_id).await {
                                eprintln!("switch failed: {e}");
                            } else {
                                println!("switched to {}", t.thread_id);
                            }
                        }
                        Err(e) => eprintln!("thread create failed: {e}"),
                    }
                }
                "switch" => {
                    if arg.is_empty() {
                        eprintln!("usage: /switch <thread_id>");
                    } else if let Err(e) = session.switch_thread(arg).await {
                        eprintln!("switch failed: {e} (retry with /switch)");
                    } else {
                        render_transcript(&session).await;
                    }
                }
                "history" => render_transcript(&session).await,
                other => eprintln!("unknown command: /{other}"),
            }
            continue;
        }

        let session = session.clone();
        tokio::spawn(async move {
            if let Err(e) = session.send_message(&line).await {
                eprintln!("\nmessage failed: {e} (press enter to retry)");
            }
        });
    }

    Ok(())
}

fn render_update(update: &SessionUpdate) {
    match update {
        SessionUpdate::Delta { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        SessionUpdate::Finalized(msg) => {
            if msg.role != Role::Assistant {
                println!("[{}] {}", role_label(msg.role), msg.content);
            }
        }
        SessionUpdate::ThreadTitle { title, .. } => {
            println!("(thread renamed: {title})");
        }
        SessionUpdate::StreamEnded { .. } => println!(),
    }
}

async fn render_transcript(session: &ChatSession) {
    for item in session.messages().await {
        match item {
            TranscriptItem::Message(msg) => {
                println!("[{}] {}", role_label(msg.role), msg.content);
            }
            TranscriptItem::Group(group) => {
                println!("── retrieval ({} items) ──", group.items.len());
                for msg in &group.items {
                    println!("   {}", msg.content);
                }
            }
        }
    }
}

fn role_label(role: Role) -> &'static str {
    match role {
        Role::User => "you",
        Role::Assistant => "assistant",
        Role::System => "system",
        Role::Tool => "tool",
    }
}

fn tracing_filter() -> tracing_subscriber::EnvFilter {
    let explicit = env::var("MNEMO_LOG").or_else(|_| env::var("RUST_LOG")).ok();
    if let Some(filter) = explicit {
        return tracing_subscriber::EnvFilter::new(filter);
    }
    if matches!(
        env::var("MNEMO_DEBUG").as_deref(),
        Ok("1" | "true" | "TRUE" | "yes" | "YES")
    ) {
        return tracing_subscriber::EnvFilter::new("debug");
    }
    tracing_subscriber::EnvFilter::new("warn")
}
