//! # pairchat
//!
//! Terminal front end. Connection codes are printed as single-line JSON and
//! pasted back with `/accept` or `/answer`; anything that is not a command is
//! sent as a chat message.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pairchat_client::{open_database, ClientConfig, Command, Driver, Notice, Reconnection};
use pairchat_media::{DeviceCapture, DevicePlayback};
use pairchat_shared::attachment::{AudioClip, MediaAttachment};
use pairchat_shared::types::{Author, ContactId};

const HELP: &str = "\
/offer                 create a connection code for the other side
/accept <code>         answer a connection code you received
/answer <code>         apply the answer to your offer
/typing on|off         show or clear the typing indicator
/voice <file> <secs>   send a recorded voice clip
/image <file>          send an image or video
/call /pickup /reject /hangup /mute
/save <name>           save this contact for later reconnection
/rename <name>         rename this contact
/contacts              list saved contacts
/reconnect <id>        try to reconnect to a saved contact
/disconnect            close the connection
/export <file>         write a JSON backup
/import <file>         restore a JSON backup
/clear                 delete all local data
/quit";

/// One parsed line of input.
#[derive(Debug)]
enum Input {
    Command(Command),
    Voice { path: PathBuf, duration: f64 },
    Media(PathBuf),
    Help,
    Invalid(&'static str),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(
                "pairchat=info,pairchat_client=debug,pairchat_media=info,pairchat_store=info,warn",
            )
        }))
        .init();

    info!("Starting pairchat v{}", env!("CARGO_PKG_VERSION"));

    let config = ClientConfig::from_env();
    info!(?config, "Loaded configuration");

    let db = open_database(&config)?;

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(32);
    let (notice_tx, notice_rx) = mpsc::channel::<Notice>(64);

    tokio::spawn(print_notices(notice_rx));
    tokio::spawn(read_input(cmd_tx));

    println!("pairchat ready. Type /help for commands.");

    let driver = Driver::new(
        db,
        config.peer.clone(),
        Arc::new(DeviceCapture),
        Arc::new(DevicePlayback),
        notice_tx,
    );
    driver.run(cmd_rx).await;

    Ok(())
}

async fn read_input(commands: mpsc::Sender<Command>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to read input");
                break;
            }
        };

        let command = match parse_line(&line) {
            None => continue,
            Some(Input::Command(cmd)) => cmd,
            Some(Input::Help) => {
                println!("{HELP}");
                continue;
            }
            Some(Input::Invalid(usage)) => {
                println!("usage: {usage}");
                continue;
            }
            Some(Input::Voice { path, duration }) => match tokio::fs::read(&path).await {
                Ok(data) => Command::SendAudio(AudioClip::new(data, audio_mime(&path), duration)),
                Err(e) => {
                    println!("! cannot read {}: {e}", path.display());
                    continue;
                }
            },
            Some(Input::Media(path)) => match tokio::fs::read(&path).await {
                Ok(data) => Command::SendMedia(MediaAttachment::new(data, media_mime(&path))),
                Err(e) => {
                    println!("! cannot read {}: {e}", path.display());
                    continue;
                }
            },
        };

        let quit = matches!(command, Command::Quit);
        if commands.send(command).await.is_err() || quit {
            break;
        }
    }
}

fn parse_line(line: &str) -> Option<Input> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(Input::Command(Command::SendMessage(line.to_string())));
    };

    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    let input = match (name, arg) {
        ("help", _) => Input::Help,
        ("offer", _) => Input::Command(Command::CreateOffer),
        ("accept", "") => Input::Invalid("/accept <code>"),
        ("accept", code) => Input::Command(Command::AcceptOffer(code.to_string())),
        ("answer", "") => Input::Invalid("/answer <code>"),
        ("answer", code) => Input::Command(Command::AcceptAnswer(code.to_string())),
        ("typing", "on") => Input::Command(Command::Typing(true)),
        ("typing", "off") => Input::Command(Command::Typing(false)),
        ("typing", _) => Input::Invalid("/typing on|off"),
        ("voice", arg) => match arg.rsplit_once(char::is_whitespace) {
            Some((path, secs)) => match secs.parse::<f64>() {
                Ok(duration) => Input::Voice {
                    path: PathBuf::from(path.trim()),
                    duration,
                },
                Err(_) => Input::Invalid("/voice <file> <secs>"),
            },
            None => Input::Invalid("/voice <file> <secs>"),
        },
        ("image", "") => Input::Invalid("/image <file>"),
        ("image", path) => Input::Media(PathBuf::from(path)),
        ("call", _) => Input::Command(Command::StartCall),
        ("pickup", _) => Input::Command(Command::AcceptCall),
        ("reject", _) => Input::Command(Command::RejectCall),
        ("hangup", _) => Input::Command(Command::EndCall),
        ("mute", _) => Input::Command(Command::ToggleMute),
        ("save", "") => Input::Invalid("/save <name>"),
        ("save", name) => Input::Command(Command::SaveContact(name.to_string())),
        ("rename", "") => Input::Invalid("/rename <name>"),
        ("rename", name) => Input::Command(Command::RenameContact(name.to_string())),
        ("contacts", _) => Input::Command(Command::ListContacts),
        ("reconnect", "") => Input::Invalid("/reconnect <id>"),
        ("reconnect", id) => Input::Command(Command::Reconnect(ContactId::from(id))),
        ("disconnect", _) => Input::Command(Command::Disconnect),
        ("export", "") => Input::Invalid("/export <file>"),
        ("export", path) => Input::Command(Command::Export(PathBuf::from(path))),
        ("import", "") => Input::Invalid("/import <file>"),
        ("import", path) => Input::Command(Command::Import(PathBuf::from(path))),
        ("clear", _) => Input::Command(Command::ClearAll),
        ("quit", _) | ("exit", _) => Input::Command(Command::Quit),
        _ => Input::Help,
    };
    Some(input)
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase()
}

fn audio_mime(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "ogg" | "oga" => "audio/ogg",
        "mp3" => "audio/mpeg",
        "wav" => "audio/wav",
        "m4a" => "audio/mp4",
        _ => "audio/webm",
    }
}

fn media_mime(path: &Path) -> &'static str {
    match extension(path).as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        "mov" => "video/quicktime",
        _ => "application/octet-stream",
    }
}

async fn print_notices(mut notices: mpsc::Receiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::Offer(code) => {
                println!("-- offer code, send it to your contact --");
                println!("{code}");
            }
            Notice::Answer(code) => {
                println!("-- answer code, send it back to your contact --");
                println!("{code}");
            }
            Notice::SessionStarted {
                contact_id,
                name,
                history,
            } => {
                println!("== {name} ({contact_id}) ==");
                for message in &history {
                    print_message(message);
                }
            }
            Notice::Connection(state) => println!("* connection {state}"),
            Notice::Message(message) => print_message(&message),
            Notice::NotSent => println!("! not sent, the connection is not open"),
            Notice::PeerTyping(true) => println!("* typing..."),
            Notice::PeerTyping(false) => {}
            Notice::Call(state) => println!("* call {state}"),
            Notice::Muted(muted) => println!("* microphone {}", if muted { "muted" } else { "on" }),
            Notice::ContactSaved(contact) => println!("* saved {} ({})", contact.name, contact.id),
            Notice::Contacts(contacts) => {
                if contacts.is_empty() {
                    println!("* no saved contacts");
                }
                for c in contacts {
                    let last = c
                        .last_connected
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "never".into());
                    println!("  {}  {}  {}  last connected {last}", c.id, c.name, c.my_role.as_str());
                }
            }
            Notice::Reconnect(Reconnection::AnswerApplied) => {
                println!("* stored answer applied, waiting for the peer");
            }
            Notice::Reconnect(Reconnection::NewAnswer(code)) => {
                println!("-- new answer code, the peer must apply it --");
                println!("{code}");
            }
            Notice::Exported(path) => println!("* exported to {}", path.display()),
            Notice::Imported(stats) => println!(
                "* imported {} sessions, {} messages, {} contacts, {} saved contacts",
                stats.sessions_imported,
                stats.messages_imported,
                stats.contacts_imported,
                stats.saved_contacts_imported
            ),
            Notice::Cleared => println!("* all local data deleted"),
            Notice::Error(e) => println!("! {e}"),
        }
    }
}

fn print_message(message: &pairchat_store::Message) {
    let who = match message.sender {
        Author::Me => "me",
        Author::Peer => "peer",
    };
    let time = message.timestamp.format("%H:%M");
    println!("[{time}] {who}: {}", message.text);
}

#[cfg(test)]
mod tests {
    use super::*;
    use pairchat_shared::types::MediaKind;

    #[test]
    fn plain_text_is_a_message() {
        assert!(matches!(
            parse_line("  hello there "),
            Some(Input::Command(Command::SendMessage(ref t))) if t == "hello there"
        ));
        assert!(parse_line("   ").is_none());
    }

    #[test]
    fn commands_with_arguments() {
        assert!(matches!(
            parse_line(r#"/accept {"type":"offer","sdp":"v=0"}"#),
            Some(Input::Command(Command::AcceptOffer(ref c))) if c.starts_with('{')
        ));
        assert!(matches!(parse_line("/accept"), Some(Input::Invalid(_))));
        assert!(matches!(
            parse_line("/voice clip one.ogg 3.5"),
            Some(Input::Voice { ref path, duration }) if path == Path::new("clip one.ogg") && duration == 3.5
        ));
        assert!(matches!(parse_line("/voice clip.ogg"), Some(Input::Invalid(_))));
        assert!(matches!(
            parse_line("/reconnect peer-1"),
            Some(Input::Command(Command::Reconnect(ref id))) if id.as_str() == "peer-1"
        ));
        assert!(matches!(parse_line("/nope"), Some(Input::Help)));
    }

    #[test]
    fn mime_from_extension() {
        assert_eq!(media_mime(Path::new("a.PNG")), "image/png");
        assert_eq!(media_mime(Path::new("a.mov")), "video/quicktime");
        assert_eq!(
            MediaKind::from_mime(media_mime(Path::new("a.txt"))),
            None
        );
        assert_eq!(audio_mime(Path::new("note.ogg")), "audio/ogg");
    }
}
