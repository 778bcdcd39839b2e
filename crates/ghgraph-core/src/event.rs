//! Archive event decoding.
//!
//! Raw archive events are JSON objects discriminated by their `type` field.
//! Only five event shapes carry an interaction; everything else is dropped
//! before it reaches the pipeline.

use crate::error::{Error, Result};
use crate::interaction::{Interaction, InteractionType};
use serde::Deserialize;

/// A raw archive event, decoded just far enough to classify it.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum RawEvent {
    WatchEvent(RawBody),
    ForkEvent(RawBody),
    IssueCommentEvent(RawBody),
    IssuesEvent(RawBody),
    PullRequestEvent(RawBody),
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct RawBody {
    actor: RawActor,
    repo: RawRepo,
    #[serde(default)]
    payload: RawPayload,
}

#[derive(Debug, Deserialize)]
struct RawActor {
    login: String,
}

#[derive(Debug, Deserialize)]
struct RawRepo {
    name: String,
}

#[derive(Debug, Default, Deserialize)]
struct RawPayload {
    #[serde(default)]
    action: Option<String>,
}

impl RawBody {
    fn action_is(&self, expected: &str) -> bool {
        self.payload.action.as_deref() == Some(expected)
    }
}

/// Decode a single archive event line.
///
/// Returns `Ok(None)` for event types (or actions) that carry no interaction.
///
/// # Errors
///
/// Returns an error if the line is not valid JSON, a recognised event is
/// missing `actor.login` / `repo.name`, or the repository name has no owner.
pub fn decode_event(line: &str) -> Result<Option<Interaction>> {
    let event: RawEvent = serde_json::from_str(line)?;

    let (body, kind) = match event {
        RawEvent::WatchEvent(body) => (body, InteractionType::WatchRepo),
        RawEvent::ForkEvent(body) => (body, InteractionType::ForkRepo),
        RawEvent::IssueCommentEvent(body) if body.action_is("created") => {
            (body, InteractionType::CommentIssue)
        }
        RawEvent::IssuesEvent(body) if body.action_is("opened") => {
            (body, InteractionType::OpenIssue)
        }
        RawEvent::PullRequestEvent(body) if body.action_is("opened") => {
            (body, InteractionType::PullRequest)
        }
        _ => return Ok(None),
    };

    let repo_owner = repo_owner(&body.repo.name)?;
    Ok(Some(Interaction {
        user: body.actor.login,
        repo_owner,
        repo: repo_id(&body.repo.name),
        kind,
    }))
}

/// The owner segment of an `owner/name` repository name.
pub fn repo_owner(repo_name: &str) -> Result<String> {
    let owner = repo_name.split('/').next().unwrap_or_default().trim();
    if owner.is_empty() {
        return Err(Error::InvalidField {
            field: "repo.name",
            reason: format!("no owner in {repo_name:?}"),
        });
    }
    Ok(owner.to_string())
}

/// Owner-qualified repository id: `owner/name` becomes `owner-name`.
pub fn repo_id(repo_name: &str) -> String {
    repo_name.replace('/', "-")
}
