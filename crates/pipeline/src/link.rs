use renderer::BuildStatus;
use tracing::debug;

use crate::session::Session;
use crate::ChannelId;

/// The only channel variant selector this build understands.
pub const MODE_CLASSIC: &str = "classic";

/// Decoded form of a shareable session link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedSession {
    pub mode: String,
    pub source: String,
    pub sound_source: Option<String>,
    pub sound: bool,
}

/// Serializes the current edit session to query-style key/value pairs.
///
/// `soundsource` is emitted only while the audio channel is both enabled
/// and healthy, so a restored link never resurrects a broken sound program
/// alongside a working visual one.
pub fn encode_session(session: &Session) -> String {
    let mut pairs: Vec<(&str, String)> = vec![
        ("mode", MODE_CLASSIC.to_string()),
        (
            "source",
            urlencoding::encode(session.source(ChannelId::Visual)).into_owned(),
        ),
        ("sound", session.sound_enabled().to_string()),
    ];
    if session.sound_enabled()
        && session.report(ChannelId::Audio).status == BuildStatus::Ready
    {
        pairs.push((
            "soundsource",
            urlencoding::encode(session.source(ChannelId::Audio)).into_owned(),
        ));
    }

    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Parses a query string back into session contents.
///
/// Unknown keys are ignored; a missing `mode` falls back to classic. The
/// result reproduces the channel sources and the enabled-audio state.
pub fn decode_session(query: &str) -> SharedSession {
    let mut shared = SharedSession {
        mode: MODE_CLASSIC.to_string(),
        source: String::new(),
        sound_source: None,
        sound: false,
    };

    for pair in query.trim_start_matches('?').split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key {
            "mode" => shared.mode = value.to_string(),
            "source" => {
                if let Some(decoded) = percent_decode(value) {
                    shared.source = decoded;
                }
            }
            "soundsource" => {
                shared.sound_source = percent_decode(value);
            }
            "sound" => shared.sound = value == "true",
            other => debug!(key = other, "ignoring unknown share-link key"),
        }
    }
    shared
}

fn percent_decode(value: &str) -> Option<String> {
    match urlencoding::decode(value) {
        Ok(decoded) => Some(decoded.into_owned()),
        Err(err) => {
            debug!(error = %err, "share-link value is not valid percent-encoded UTF-8");
            None
        }
    }
}
