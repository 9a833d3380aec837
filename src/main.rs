use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

use color_eyre::eyre::eyre;
use color_eyre::Result;
use threadline::models::{ChatState, TextField};
use threadline::{logging, BackendClient, ClientConfig, ControllerConfig, SessionController, SessionEvent};
use tokio::sync::mpsc::UnboundedReceiver;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const USAGE: &str = "usage: threadline <chat-id> [message...]";

fn main() -> Result<()> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("threadline {}", VERSION);
        return Ok(());
    }

    color_eyre::install()?;
    logging::init("warn");

    let mut args = std::env::args().skip(1);
    let chat_id = args.next().ok_or_else(|| eyre!(USAGE))?;
    let message = args.collect::<Vec<_>>().join(" ");

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run(chat_id, message))
}

async fn run(chat_id: String, message: String) -> Result<()> {
    let config = ClientConfig::from_env();
    tracing::info!(base_url = %config.base_url, chat_id = %chat_id, "Starting");

    let backend = BackendClient::from_config(config);
    let mut controller = SessionController::new(Arc::new(backend), ControllerConfig::default());
    let mut events = controller.subscribe();
    let mut printer = Printer::default();

    controller.activate_chat(&chat_id);

    if !message.is_empty() {
        // A turn already running on the server has to finish first.
        controller
            .wait_until(|c| {
                c.session(&chat_id).is_some_and(|s| s.history_loaded)
                    && c.chat_state(&chat_id) == Some(ChatState::Static)
                    && !c.is_chat_busy(&chat_id)
            })
            .await;
        printer.drain(&mut events);
        controller.send_message(&chat_id, &message)?;
    }

    while controller.is_busy() {
        tokio::select! {
            _ = controller.process_next() => {}
            _ = tokio::signal::ctrl_c() => {
                controller.stop();
                eprintln!("\n[stopped]");
            }
        }
        printer.drain(&mut events);
    }
    printer.drain(&mut events);
    printer.finish();

    match printer.failure.take() {
        Some(error) => Err(eyre!(error)),
        None => Ok(()),
    }
}

/// Writes streamed text as it grows: answers to stdout, thoughts to stderr.
#[derive(Default)]
struct Printer {
    printed: HashMap<(String, TextField), usize>,
    wrote_any: bool,
    failure: Option<String>,
}

impl Printer {
    fn drain(&mut self, events: &mut UnboundedReceiver<SessionEvent>) {
        while let Ok(event) = events.try_recv() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: SessionEvent) {
        match event {
            SessionEvent::TextUpdated {
                message_id,
                field,
                text,
                ..
            } => {
                let printed = self.printed.entry((message_id, field)).or_insert(0);
                let Some(delta) = text.get(*printed..) else {
                    return;
                };
                if delta.is_empty() {
                    return;
                }
                *printed = text.len();
                self.wrote_any = true;
                match field {
                    TextField::Content => {
                        print!("{}", delta);
                        let _ = std::io::stdout().flush();
                    }
                    TextField::Thoughts => {
                        eprint!("{}", delta);
                    }
                }
            }
            SessionEvent::MessageRetargeted { old_id, new_id, .. } => {
                for field in [TextField::Thoughts, TextField::Content] {
                    if let Some(count) = self.printed.remove(&(old_id.clone(), field)) {
                        self.printed.insert((new_id.clone(), field), count);
                    }
                }
            }
            SessionEvent::StreamFailed { error, .. } => {
                self.failure = Some(error);
            }
            SessionEvent::HistoryFailed { error, .. } => {
                tracing::warn!(error = %error, "History unavailable");
            }
            SessionEvent::StateChanged { .. } | SessionEvent::MessagesReplaced { .. } => {}
        }
    }

    fn finish(&self) {
        if self.wrote_any {
            println!();
        }
    }
}
