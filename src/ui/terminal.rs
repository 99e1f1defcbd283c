use anyhow::Result;
use std::collections::HashSet;
use std::io::{self, BufRead, Write};
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use std::thread;

use crate::engine::engine::EngineHandle;
use crate::engine::llm_client::LlmClient;
use crate::engine::protocol::{EngineCommand, EngineResponse};
use crate::engine::turn::IgnoreReason;
use crate::model::game_state::{Language, SubjectDescriptor};
use crate::model::message::Sender;
use crate::store::sync::SyncState;
use crate::store::Identity;

const HELP: &str = "\
commands:
  /start <designation> <role>   begin a session
  /lang <en|zh>                 language for the next session
  /save [id]  /saves  /load <id>  /delete <id>
  /enter      skip the ending countdown
  /cancel     pause the ending countdown
  /reset      drop the current session
  /login <user_id> <token>  /logout
  /ping       check the model endpoint
  /quit
anything else is sent as your action";

/// One line of player input, decoded.
#[derive(Debug)]
pub enum Input {
    Engine(EngineCommand),
    SetLanguage(Language),
    Ping,
    Help,
    Quit,
    Invalid(String),
    Nothing,
}

pub fn parse_line(line: &str, language: Language) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Nothing;
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Input::Engine(EngineCommand::UserInput(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let cmd = parts.next().unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    match (cmd, args.as_slice()) {
        ("start", [designation, role @ ..]) if !role.is_empty() => {
            Input::Engine(EngineCommand::StartSession {
                subject: SubjectDescriptor {
                    designation: designation.to_string(),
                    name: designation.to_string(),
                    containment_class: "Unknown".into(),
                    ..SubjectDescriptor::default()
                },
                role: role.join(" "),
                language,
            })
        }
        ("lang", [tag]) => match Language::parse(tag) {
            Some(lang) => Input::SetLanguage(lang),
            None => Input::Invalid(format!("unknown language '{tag}'")),
        },
        ("save", []) => Input::Engine(EngineCommand::SaveGame { id: None }),
        ("save", [id]) => Input::Engine(EngineCommand::SaveGame {
            id: Some(id.to_string()),
        }),
        ("saves", []) => Input::Engine(EngineCommand::ListSaves),
        ("load", [id]) => Input::Engine(EngineCommand::LoadSave { id: id.to_string() }),
        ("delete", [id]) => Input::Engine(EngineCommand::DeleteSave { id: id.to_string() }),
        ("enter", []) => Input::Engine(EngineCommand::EnterEnding),
        ("cancel", []) => Input::Engine(EngineCommand::CancelCountdown),
        ("reset", []) => Input::Engine(EngineCommand::ResetSession),
        ("login", [user_id, token]) => Input::Engine(EngineCommand::SignIn(Identity {
            user_id: user_id.to_string(),
            access_token: token.to_string(),
        })),
        ("logout", []) => Input::Engine(EngineCommand::SignOut),
        ("ping", []) => Input::Ping,
        ("help", _) => Input::Help,
        ("quit" | "exit", _) => Input::Quit,
        _ => Input::Invalid(format!("cannot parse '/{rest}', try /help")),
    }
}

/// Turns engine responses into printable lines. Each transcript message is
/// printed once.
#[derive(Default)]
pub struct Renderer {
    printed: HashSet<String>,
    typing: HashSet<String>,
}

impl Renderer {
    pub fn render(&mut self, resp: EngineResponse) -> Option<String> {
        match resp {
            EngineResponse::FullMessageHistory(messages) => {
                if messages.is_empty() {
                    self.printed.clear();
                }
                self.typing.clear();
                let done: Vec<String> = messages
                    .iter()
                    .filter(|m| !m.is_typing && self.printed.insert(m.id.clone()))
                    .map(|m| match m.sender {
                        Sender::User => format!("> {}", m.content),
                        Sender::System => format!("[{}]", m.content),
                        Sender::Narrator => m.content.clone(),
                    })
                    .collect();
                (!done.is_empty()).then(|| done.join("\n\n"))
            }
            EngineResponse::MessagePatched { id, .. } => {
                self.typing.insert(id).then(|| "...".to_string())
            }
            EngineResponse::TurnIgnored(IgnoreReason::EmptyInput) => None,
            EngineResponse::TurnIgnored(IgnoreReason::TurnInFlight) => {
                Some("(still waiting for the narrator)".into())
            }
            EngineResponse::TurnIgnored(IgnoreReason::SessionNotActive) => {
                Some("(no active session, use /start or /load)".into())
            }
            EngineResponse::TurnCompleted {
                narrator_id,
                text,
                stability,
                ending,
            } => {
                self.printed.insert(narrator_id);
                let mut out = format!("{text}\n[stability {stability}]");
                if let Some(ending) = ending {
                    out.push_str(&format!(" [ending {ending}]"));
                }
                Some(out)
            }
            // The localized notice arrives with the next history.
            EngineResponse::TurnFailed {
                failure,
                restore_input,
            } => {
                log::debug!("turn failed: {failure}");
                restore_input.map(|input| format!("(retry with: {input})"))
            }
            EngineResponse::SessionStartFailed(failure) => {
                Some(format!("session could not start: {failure}"))
            }
            EngineResponse::ImageAttached(target) => {
                log::debug!("image ready for {target:?}");
                None
            }
            EngineResponse::StateChanged(status) => {
                log::debug!("state: {status:?}");
                None
            }
            EngineResponse::CountdownStarted { ending, remaining } => Some(format!(
                "*** ending reached: {ending}. archiving in {remaining}s (/enter now, /cancel to pause) ***"
            )),
            EngineResponse::CountdownTick(remaining) => Some(format!("... {remaining}")),
            EngineResponse::CountdownCancelled => {
                Some("countdown paused, /enter when ready".into())
            }
            EngineResponse::GameOver { ending, timeline } => {
                let mut out = format!("=== GAME OVER: {ending} ===");
                if !timeline.is_empty() {
                    let points: Vec<String> = timeline.iter().map(|s| s.to_string()).collect();
                    out.push_str(&format!("\nstability: {}", points.join(" > ")));
                }
                Some(out)
            }
            EngineResponse::SaveList(entries) if entries.is_empty() => Some("no saves".into()),
            EngineResponse::SaveList(entries) => Some(
                entries
                    .iter()
                    .map(|e| {
                        let mark = match e.sync {
                            SyncState::Synced => "cloud",
                            SyncState::PendingUpload => "uploading",
                            SyncState::PendingDownload => "downloading",
                            SyncState::LocalOnly => "local",
                        };
                        format!(
                            "{}  {}  [{}]  {}",
                            e.meta.id,
                            e.meta.created_at.format("%Y-%m-%d %H:%M"),
                            mark,
                            e.meta.summary.as_deref().unwrap_or("").replace('\n', " | ")
                        )
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            EngineResponse::Saved(meta) => Some(format!("saved as {}", meta.id)),
            EngineResponse::Loaded { id } => Some(format!("loaded {id}")),
            EngineResponse::Deleted { id } => Some(format!("deleted {id}")),
            EngineResponse::StoreFailed { action, error } => Some(format!("{action} failed: {error}")),
            EngineResponse::SignedIn { user_id } => Some(format!("signed in as {user_id}")),
            EngineResponse::SignedOut => Some("signed out".into()),
        }
    }
}

/// Read player input from stdin until `/quit` or end of input.
pub fn run(handle: EngineHandle, responses: Receiver<EngineResponse>, client: Arc<LlmClient>) -> Result<()> {
    let printer = thread::spawn(move || {
        let mut renderer = Renderer::default();
        for resp in responses {
            if let Some(text) = renderer.render(resp) {
                println!("{text}\n");
            }
        }
    });

    println!("{HELP}\n");
    let mut language = Language::default();
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        match parse_line(&line, language) {
            Input::Engine(cmd) => {
                if !handle.send(cmd) {
                    log::error!("engine is gone");
                    break;
                }
            }
            Input::SetLanguage(lang) => {
                language = lang;
                println!("language set to {}", lang.tag());
            }
            Input::Ping => match client.test_connection() {
                Ok(msg) => println!("{msg}"),
                Err(e) => println!("connection failed: {e:#}"),
            },
            Input::Help => println!("{HELP}"),
            Input::Quit => break,
            Input::Invalid(msg) => println!("{msg}"),
            Input::Nothing => {}
        }
        io::stdout().flush()?;
    }

    handle.shutdown();
    if printer.join().is_err() {
        log::error!("printer thread panicked");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::turn::TurnFailure;
    use crate::model::game_state::EndingType;
    use crate::model::message::Message;

    #[test]
    fn plain_text_is_an_action() {
        match parse_line("  open the door ", Language::En) {
            Input::Engine(EngineCommand::UserInput(text)) => assert_eq!(text, "open the door"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn start_joins_role_words() {
        match parse_line("/start SCP-173 Senior Researcher", Language::Zh) {
            Input::Engine(EngineCommand::StartSession {
                subject,
                role,
                language,
            }) => {
                assert_eq!(subject.designation, "SCP-173");
                assert_eq!(role, "Senior Researcher");
                assert_eq!(language, Language::Zh);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_commands_are_reported() {
        assert!(matches!(parse_line("/start SCP-173", Language::En), Input::Invalid(_)));
        assert!(matches!(parse_line("/lang fr", Language::En), Input::Invalid(_)));
        assert!(matches!(parse_line("/load", Language::En), Input::Invalid(_)));
        assert!(matches!(parse_line("   ", Language::En), Input::Nothing));
    }

    #[test]
    fn typing_indicator_shows_once_per_message() {
        let mut r = Renderer::default();
        let patch = |content: &str| EngineResponse::MessagePatched {
            id: "m1".into(),
            content: content.into(),
        };
        assert_eq!(r.render(patch("The")).as_deref(), Some("..."));
        assert_eq!(r.render(patch("The door")), None);
    }

    #[test]
    fn timeout_offers_the_input_back() {
        let mut r = Renderer::default();
        let out = r.render(EngineResponse::TurnFailed {
            failure: TurnFailure::Timeout,
            restore_input: Some("run".into()),
        });
        assert_eq!(out.as_deref(), Some("(retry with: run)"));
    }

    #[test]
    fn game_over_shows_stability_timeline() {
        let mut r = Renderer::default();
        let out = r.render(EngineResponse::GameOver {
            ending: EndingType::Collapse,
            timeline: vec![100, 64, 0],
        });
        assert_eq!(
            out.as_deref(),
            Some("=== GAME OVER: COLLAPSE ===\nstability: 100 > 64 > 0")
        );
    }

    #[test]
    fn history_prints_only_new_messages() {
        let mut r = Renderer::default();
        let first = Message::user("look", 1);
        let mut reply = Message::narrator_placeholder(2);
        reply.finalize("Dust.".into(), Some(99));

        let out = r.render(EngineResponse::FullMessageHistory(vec![first.clone()]));
        assert_eq!(out.as_deref(), Some("> look"));

        let out = r.render(EngineResponse::FullMessageHistory(vec![first, reply]));
        assert_eq!(out.as_deref(), Some("Dust."));

        assert_eq!(r.render(EngineResponse::FullMessageHistory(Vec::new())), None);
        assert!(r.printed.is_empty());
    }
}
