//! Normalized user/repository interactions and their edge vocabulary.
//!
//! An [`Interaction`] is the only record the ingestion pipeline consumes:
//! one user acting on one repository in one of five ways. Each
//! [`InteractionType`] maps to a fixed [`VerbPair`] used as the labels of the
//! forward (`user → repo`) and inverse (`repo → user`) edges.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Vertex label for users and repository owners.
pub const USER_LABEL: &str = "user";

/// Vertex label for repositories.
pub const REPO_LABEL: &str = "repo";

/// Edge labels linking an owner to a repository and back.
pub const OWNERSHIP_VERBS: VerbPair = VerbPair {
    forward: "owns",
    inverse: "owned by",
};

/// The kind of interaction a user had with a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InteractionType {
    PullRequest,
    OpenIssue,
    CommentIssue,
    ForkRepo,
    WatchRepo,
}

impl InteractionType {
    /// Every interaction type, in declaration order.
    pub const ALL: [InteractionType; 5] = [
        InteractionType::PullRequest,
        InteractionType::OpenIssue,
        InteractionType::CommentIssue,
        InteractionType::ForkRepo,
        InteractionType::WatchRepo,
    ];

    /// The edge labels for this interaction.
    ///
    /// The match is exhaustive, so adding a variant without a verb pair is a
    /// compile error rather than a silently skipped edge.
    pub const fn verbs(self) -> VerbPair {
        match self {
            InteractionType::CommentIssue => VerbPair {
                forward: "commented on an issue for",
                inverse: "issue was commented on by",
            },
            InteractionType::ForkRepo => VerbPair {
                forward: "forked",
                inverse: "was forked by",
            },
            InteractionType::OpenIssue => VerbPair {
                forward: "opened an issue for",
                inverse: "issue was opened by",
            },
            InteractionType::PullRequest => VerbPair {
                forward: "issued a pull request for",
                inverse: "pull request was issued by",
            },
            InteractionType::WatchRepo => VerbPair {
                forward: "starred",
                inverse: "was starred by",
            },
        }
    }

    /// Stable short name, used in logs and failure records.
    pub const fn as_str(self) -> &'static str {
        match self {
            InteractionType::PullRequest => "pull_request",
            InteractionType::OpenIssue => "open_issue",
            InteractionType::CommentIssue => "comment_issue",
            InteractionType::ForkRepo => "fork_repo",
            InteractionType::WatchRepo => "watch_repo",
        }
    }
}

impl fmt::Display for InteractionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Forward and inverse edge labels describing a relationship and its mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerbPair {
    /// Label of the `user → repo` (or `owner → repo`) edge.
    pub forward: &'static str,
    /// Label of the mirrored edge.
    pub inverse: &'static str,
}

/// One user acting on one repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Interaction {
    /// Login of the acting user.
    pub user: String,
    /// Login of the repository owner.
    pub repo_owner: String,
    /// Owner-qualified repository id (`owner-name`).
    pub repo: String,
    /// What the user did.
    pub kind: InteractionType,
}

impl Interaction {
    pub fn new(
        user: impl Into<String>,
        repo_owner: impl Into<String>,
        repo: impl Into<String>,
        kind: InteractionType,
    ) -> Self {
        Self {
            user: user.into(),
            repo_owner: repo_owner.into(),
            repo: repo.into(),
            kind,
        }
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.user, self.kind, self.repo)
    }
}
