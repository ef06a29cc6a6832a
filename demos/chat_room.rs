//! Chat Room Demo
//!
//! Decodes a chat room whose messages are a mix of text, image and file
//! variants, then encodes it back to JSON.
//!
//! Run with `cargo run --example chat_room -- --pretty`.

use std::sync::OnceLock;

use clap::Parser;
use serde::{Deserialize, Serialize};
use tracing_subscriber::EnvFilter;
use typereg::{Family, RegistryId, Tagged, TypeRegistry, Variant};

#[derive(Parser)]
#[command(name = "chat-room")]
#[command(about = "Decode and re-encode a chat room of tagged messages")]
struct Cli {
    /// Pretty-print the re-encoded room
    #[arg(long)]
    pretty: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct TextMessage {
    content: String,
    sender: String,
    timestamp: i64,
}
impl Variant for TextMessage {}

#[derive(Debug, Serialize, Deserialize)]
struct ImageMessage {
    url: String,
    caption: String,
    sender: String,
    width: u32,
    height: u32,
}
impl Variant for ImageMessage {}

#[derive(Debug, Serialize, Deserialize)]
struct FileMessage {
    filename: String,
    file_size: u64,
    sender: String,
    mime_type: String,
}
impl Variant for FileMessage {}

/// All chat messages
struct Message;

/// Messages carrying an attachment; derived from `Message`
struct Attachment;

struct ChatRegistries {
    message: RegistryId,
    attachment: RegistryId,
}

fn registries() -> &'static ChatRegistries {
    static REGISTRIES: OnceLock<ChatRegistries> = OnceLock::new();
    REGISTRIES.get_or_init(|| {
        declare(TypeRegistry::global())
            .unwrap_or_else(|err| panic!("invalid chat declarations: {err}"))
    })
}

fn declare(types: &TypeRegistry) -> typereg::Result<ChatRegistries> {
    let message = types.create_registry("Message", None)?;
    let attachment = types.derive("Attachment", &[message])?;

    types.bind::<TextMessage>("text", &[message])?;
    types.bind::<ImageMessage>("image", &[attachment])?;
    types.bind::<FileMessage>("file", &[attachment])?;

    Ok(ChatRegistries { message, attachment })
}

impl Family for Message {
    fn registry() -> RegistryId {
        registries().message
    }
}

impl Family for Attachment {
    fn registry() -> RegistryId {
        registries().attachment
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatRoom {
    name: String,
    messages: Vec<Tagged<Message>>,
    pinned: Option<Tagged<Attachment>>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let chat_data = serde_json::json!({
        "name": "General Chat",
        "messages": [
            {
                "_type_tag": "text",
                "content": "Hello everyone!",
                "sender": "Alice",
                "timestamp": 1642684800
            },
            {
                "_type_tag": "image",
                "url": "https://example.com/sunset.jpg",
                "caption": "Beautiful sunset",
                "sender": "Bob",
                "width": 1920,
                "height": 1080
            },
            {
                "_type_tag": "file",
                "filename": "document.pdf",
                "file_size": 1048576,
                "sender": "Charlie",
                "mime_type": "application/pdf"
            }
        ],
        "pinned": {
            "_type_tag": "file",
            "filename": "rules.md",
            "file_size": 2048,
            "sender": "Alice",
            "mime_type": "text/markdown"
        }
    });

    let chat_room: ChatRoom = serde_json::from_value(chat_data)?;

    let types = TypeRegistry::global();
    println!("Chat room: {}", chat_room.name);
    println!("Number of messages: {}", chat_room.messages.len());
    println!("Tags: {:?}", types.tags(Message::registry())?);

    for (i, message) in chat_room.messages.iter().enumerate() {
        println!("\nMessage {}:", i + 1);
        println!("  Type: {} (tag '{}')", message.type_name(), message.tag());

        if let Some(text) = message.downcast_ref::<TextMessage>() {
            println!("  Sender: {}", text.sender);
            println!("  Content: {}", text.content);
            println!("  Timestamp: {}", text.timestamp);
        } else if let Some(image) = message.downcast_ref::<ImageMessage>() {
            println!("  Sender: {}", image.sender);
            println!("  URL: {}", image.url);
            println!("  Caption: {}", image.caption);
            println!("  Dimensions: {}x{}", image.width, image.height);
        } else if let Some(file) = message.downcast_ref::<FileMessage>() {
            println!("  Sender: {}", file.sender);
            println!("  Filename: {}", file.filename);
            println!("  Size: {} bytes", file.file_size);
            println!("  MIME type: {}", file.mime_type);
        }
    }

    println!("\nSerialized back to JSON:");
    if cli.pretty {
        println!("{}", serde_json::to_string_pretty(&chat_room)?);
    } else {
        println!("{}", serde_json::to_string(&chat_room)?);
    }

    Ok(())
}
