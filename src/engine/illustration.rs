use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;

use crate::engine::protocol::EngineEvent;
use crate::model::game_state::{GameState, SubjectDescriptor};

const TURN_STYLE: &str = ", dark aesthetic, scp foundation style, cinematic lighting";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AspectRatio {
    Square,
    Wide,
    Portrait,
}

impl AspectRatio {
    pub fn tag(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Wide => "16:9",
            AspectRatio::Portrait => "3:4",
        }
    }

    /// Pixel size requested from size-based image APIs.
    pub fn size(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1024x1024",
            AspectRatio::Wide => "1792x1024",
            AspectRatio::Portrait => "1024x1365",
        }
    }
}

/// Produces one encoded image (as a data URL) for a prompt, or nothing.
/// Callers fire and forget; there is no retry.
pub trait ImageSource: Send + Sync {
    fn generate(&self, prompt: &str, aspect: AspectRatio) -> anyhow::Result<Option<String>>;
}

/// Where a finished image goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageTarget {
    /// A transcript message, matched by id.
    Message(String),
    /// Session background, for the session it was requested in.
    Background { session: u64 },
    /// Main subject portrait, for the session it was requested in.
    MainImage { session: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllustrationRequest {
    pub target: ImageTarget,
    pub prompt: String,
    pub aspect: AspectRatio,
}

impl IllustrationRequest {
    pub fn for_message(message_id: &str, visual_prompt: &str) -> Self {
        Self {
            target: ImageTarget::Message(message_id.to_string()),
            prompt: format!("{}{}", visual_prompt.trim(), TURN_STYLE),
            aspect: AspectRatio::Wide,
        }
    }

    /// Opening scene illustration, sent without the turn style suffix.
    pub fn for_opening(message_id: &str, visual_prompt: &str) -> Self {
        Self {
            target: ImageTarget::Message(message_id.to_string()),
            prompt: visual_prompt.trim().to_string(),
            aspect: AspectRatio::Wide,
        }
    }

    pub fn background(session: u64, subject: &SubjectDescriptor) -> Self {
        let description = subject
            .visual_description
            .clone()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or_else(|| format!("texture and atmosphere of {}", subject.name));
        Self {
            target: ImageTarget::Background { session },
            prompt: format!(
                "Atmospheric, cinematic lighting, abstract horror background representing {}, subtle, texture, scp foundation style, dark moody",
                description
            ),
            aspect: AspectRatio::Wide,
        }
    }

    pub fn main_image(session: u64, subject: &SubjectDescriptor) -> Self {
        let entity = subject.entity_description.as_deref().unwrap_or("unknown anomaly");
        Self {
            target: ImageTarget::MainImage { session },
            prompt: format!(
                "Close up full body shot of {}: {}. detailed, photorealistic, containment cell, scp foundation record photo",
                subject.name, entity
            ),
            aspect: AspectRatio::Square,
        }
    }
}

/// Request an image on a helper thread and post the result back into the
/// engine inbox. Failures are logged and dropped.
pub(crate) fn spawn_illustration(
    source: Arc<dyn ImageSource>,
    request: IllustrationRequest,
    inbox: Sender<EngineEvent>,
) {
    thread::spawn(move || {
        log::debug!(
            "generating image for {:?} ({}): {:.80}",
            request.target,
            request.aspect.tag(),
            request.prompt
        );
        match source.generate(&request.prompt, request.aspect) {
            Ok(Some(image)) => {
                let _ = inbox.send(EngineEvent::ImageReady {
                    target: request.target,
                    image,
                });
            }
            Ok(None) => log::warn!("image response for {:?} contained no image", request.target),
            Err(e) => log::warn!("image generation for {:?} failed: {e:#}", request.target),
        }
    });
}

/// Attach a finished image. Returns false when its target is gone.
pub fn attach_image(state: &mut GameState, session: u64, target: &ImageTarget, image: String) -> bool {
    match target {
        ImageTarget::Message(id) => match state.message_mut(id) {
            Some(msg) => {
                msg.image_url = Some(image);
                true
            }
            None => false,
        },
        ImageTarget::Background { session: s } if *s == session => {
            state.background_image = Some(image);
            true
        }
        ImageTarget::MainImage { session: s } if *s == session => {
            state.main_image = Some(image);
            true
        }
        _ => false,
    }
}
