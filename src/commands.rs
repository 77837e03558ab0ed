// Terminal commands exposed by the REPL front-end

use crate::api::LLMApiProvider;
use crate::error::{ChatError, ChatResult};
use crate::models::{Chat, Message, Role};
use crate::session::ChatSession;
use crate::thinking::Extracted;
use std::future::Future;
use std::io::Write;
use uuid::Uuid;

pub const HELP: &str = "\
Type a message to send it. Commands:
  /new               start a new chat
  /list              list chats (most recent first)
  /select <n>        switch to chat n
  /delete [n]        delete chat n (default: active chat)
  /clear             delete all chats
  /rename <title>    rename the active chat
  /regen             regenerate the last response
  /models            list models offered by the endpoint
  /model <id>        use model <id>
  /key <api key>     save the API key in the OS keyring
  /thinking on|off   show or hide thinking segments
  /config            show the API configuration
  /help              show this help
  /quit              exit
Ctrl-C while a response is streaming stops it; at the prompt it exits.";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Send(String),
    New,
    List,
    Select(usize),
    Delete(Option<usize>),
    Clear,
    Rename(String),
    Regenerate,
    Models,
    Model(String),
    Key(String),
    Thinking(bool),
    Config,
    Help,
    Quit,
    Empty,
}

fn parse_index(arg: &str) -> Result<usize, String> {
    match arg.parse::<usize>() {
        Ok(n) if n >= 1 => Ok(n),
        _ => Err(format!("Invalid chat number: {}", arg)),
    }
}

/// Parses one input line. Lines not starting with `/` are messages.
pub fn parse(line: &str) -> Result<Command, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(Command::Empty);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Command::Send(line.to_string()));
    };
    let (name, arg) = match rest.split_once(char::is_whitespace) {
        Some((name, arg)) => (name, arg.trim()),
        None => (rest, ""),
    };

    match (name, arg) {
        ("new", _) => Ok(Command::New),
        ("list", _) => Ok(Command::List),
        ("select", a) if !a.is_empty() => parse_index(a).map(Command::Select),
        ("delete", "") => Ok(Command::Delete(None)),
        ("delete", a) => parse_index(a).map(|n| Command::Delete(Some(n))),
        ("clear", _) => Ok(Command::Clear),
        ("rename", a) if !a.is_empty() => Ok(Command::Rename(a.to_string())),
        ("regen" | "regenerate", _) => Ok(Command::Regenerate),
        ("models", _) => Ok(Command::Models),
        ("model", a) if !a.is_empty() => Ok(Command::Model(a.to_string())),
        ("key", a) if !a.is_empty() => Ok(Command::Key(a.to_string())),
        ("thinking", "on") => Ok(Command::Thinking(true)),
        ("thinking", "off") => Ok(Command::Thinking(false)),
        ("config", _) => Ok(Command::Config),
        ("help" | "?", _) => Ok(Command::Help),
        ("quit" | "exit" | "q", _) => Ok(Command::Quit),
        (name, _) => Err(format!("Unknown or incomplete command: /{} (try /help)", name)),
    }
}

/// Renders a thinking/response split for the terminal.
pub fn render_extracted(extracted: &Extracted, show_thinking: bool) -> String {
    match &extracted.thinking {
        Some(thinking) if show_thinking => {
            format!("[thinking]\n{}\n[/thinking]\n{}", thinking, extracted.response)
        }
        _ => extracted.response.clone(),
    }
}

/// Renders a message for the terminal.
pub fn render_message(message: &Message, show_thinking: bool) -> String {
    match message.role {
        Role::Assistant => render_extracted(&message.rendered(), show_thinking),
        role => format!("{}> {}", role, message.content),
    }
}

const OPEN_SEGMENTS: [(&str, &str); 3] = [
    ("<think>", "</think>"),
    ("[thinking]", "[/thinking]"),
    ("<!--", "-->"),
];

// Cuts the text at a thinking segment whose closing marker has not arrived.
fn hold_back_open_segment(text: &str) -> &str {
    for (open, close) in OPEN_SEGMENTS {
        if let Some(start) = text.find(open) {
            if !text[start..].contains(close) {
                return &text[..start];
            }
        }
    }
    text
}

#[derive(Debug, PartialEq, Eq)]
enum Echo<'a> {
    Nothing,
    Append(&'a str),
    Redraw(&'a str),
}

// What to write so the terminal shows `current` after `printed`.
fn echo<'a>(printed: &str, current: &'a str) -> Echo<'a> {
    if current.is_empty() || current == printed {
        return Echo::Nothing;
    }
    match current.strip_prefix(printed) {
        Some(rest) => Echo::Append(rest),
        None => Echo::Redraw(current),
    }
}

fn write_echo<W: Write>(out: &mut W, printed: &mut String, current: &str) {
    let result = match echo(printed, current) {
        Echo::Nothing => return,
        Echo::Append(rest) => write!(out, "{}", rest),
        Echo::Redraw(text) if printed.is_empty() => write!(out, "{}", text),
        Echo::Redraw(text) => write!(out, "\n{}", text),
    };
    if let Err(e) = result.and_then(|_| out.flush()) {
        log::debug!("Failed to write stream output: {}", e);
    }
    *printed = current.to_string();
}

/// Runs `request`, echoing the rendered reply as it grows. `interrupt`
/// resolving stops generation.
async fn drive<F, I, W>(
    session: &ChatSession,
    request: F,
    interrupt: I,
    out: &mut W,
) -> ChatResult<Message>
where
    F: Future<Output = ChatResult<Message>>,
    I: Future<Output = ()>,
    W: Write,
{
    let show_thinking = session.show_thinking();
    let mut updates = session.subscribe_streaming();
    let mut printed = String::new();
    let mut interrupted = false;
    tokio::pin!(request);
    tokio::pin!(interrupt);

    let result = loop {
        tokio::select! {
            result = &mut request => break result,
            changed = updates.changed() => {
                if changed.is_err() {
                    continue;
                }
                updates.borrow_and_update();
                let mut preview = session.streaming_preview();
                preview.response = hold_back_open_segment(&preview.response).to_string();
                write_echo(out, &mut printed, &render_extracted(&preview, show_thinking));
            }
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                session.stop_generation();
            }
        }
    };

    if let Ok(message) = &result {
        write_echo(out, &mut printed, &render_message(message, show_thinking));
    }
    if !printed.is_empty() {
        let _ = writeln!(out);
    }
    result
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Executes one command. Returns false when the REPL should exit.
pub async fn execute(session: &ChatSession, command: Command) -> bool {
    match command {
        Command::Empty => {}
        Command::Quit => return false,
        Command::Help => println!("{}", HELP),
        Command::Send(text) => {
            let request = session.send_message(&text);
            report(drive(session, request, ctrl_c(), &mut std::io::stdout()).await)
        }
        Command::Regenerate => {
            let request = session.regenerate_message();
            report(drive(session, request, ctrl_c(), &mut std::io::stdout()).await)
        }
        Command::New => {
            let chat = session.store().lock().await.create_chat().await;
            println!("Started new chat {}", chat.id);
        }
        Command::List => {
            let store = session.store().lock().await;
            if store.chats().is_empty() {
                println!("No chats yet.");
            }
            for (i, chat) in store.chats().iter().enumerate() {
                let marker = if store.current_chat_id() == Some(chat.id) { "*" } else { " " };
                println!(
                    "{} {:>2}. {} ({} messages, updated {})",
                    marker,
                    i + 1,
                    chat.title,
                    chat.messages.len(),
                    chat.updated_at.format("%Y-%m-%d %H:%M")
                );
            }
        }
        Command::Select(n) => {
            let mut store = session.store().lock().await;
            let Some(chat_id) = chat_at(store.chats(), n) else {
                println!("No chat number {}", n);
                return true;
            };
            store.select_chat(chat_id);
            let show_thinking = session.show_thinking();
            if let Some(chat) = store.current_chat() {
                println!("== {} ==", chat.title);
                for message in &chat.messages {
                    println!("{}", render_message(message, show_thinking));
                }
            }
        }
        Command::Delete(n) => {
            let mut store = session.store().lock().await;
            let target = match n {
                Some(n) => chat_at(store.chats(), n),
                None => store.current_chat_id(),
            };
            match target {
                Some(chat_id) => {
                    store.delete_chat(chat_id).await;
                    println!("Chat deleted.");
                }
                None => println!("No such chat."),
            }
        }
        Command::Clear => {
            session.store().lock().await.clear().await;
            println!("All chats deleted.");
        }
        Command::Rename(title) => {
            let mut store = session.store().lock().await;
            match store.current_chat_id() {
                Some(chat_id) => report(store.rename_chat(chat_id, &title).await),
                None => println!("No active chat."),
            }
        }
        Command::Models => {
            let config = session.store().lock().await.api_config().clone();
            match session.provider().list_models(&config).await {
                Ok(models) if models.is_empty() => println!("The endpoint listed no models."),
                Ok(models) => {
                    for model in models {
                        let marker = if model.id == config.model { "*" } else { " " };
                        println!("{} {} ({})", marker, model.id, model.name);
                    }
                }
                Err(e) => println!("Error: {}", e),
            }
        }
        Command::Model(id) => {
            let mut store = session.store().lock().await;
            let mut config = store.api_config().clone();
            config.model = id;
            println!("Using model {}", config.model);
            store.set_api_config(config).await;
        }
        Command::Key(key) => {
            let mut store = session.store().lock().await;
            let mut config = store.api_config().clone();
            match crate::config::store_api_key_in_keyring(&mut config, &key) {
                Ok(()) => {
                    store.set_api_config(config).await;
                    println!("API key saved to the keyring.");
                }
                Err(e) => println!("Error: {:#}", e),
            }
        }
        Command::Thinking(show) => {
            session.set_show_thinking(show);
            println!("Thinking segments {}.", if show { "shown" } else { "hidden" });
        }
        Command::Config => {
            let store = session.store().lock().await;
            let config = store.api_config();
            println!("Base URL: {}", config.base_url);
            println!("Model:    {}", config.model);
            println!(
                "API key:  {}",
                if crate::config::has_api_key(config) { "configured" } else { "not set" }
            );
        }
    }
    true
}

// 1-based position in the listing
fn chat_at(chats: &[Chat], n: usize) -> Option<Uuid> {
    n.checked_sub(1).and_then(|i| chats.get(i)).map(|c| c.id)
}

fn report<T>(result: ChatResult<T>) {
    if let Err(e) = result {
        match e {
            ChatError::Cancelled => println!("(stopped)"),
            e => println!("Error: {}", e),
        }
    }
}
