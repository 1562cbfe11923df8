//! Content bindings and the matcher that negotiates them between a collection
//! and a client.

use serde::{Deserialize, Serialize};

/// A content format identifier, optionally narrowed to a list of subtypes.
///
/// An empty `subtypes` list means "all subtypes".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "ContentBindingRepr")]
pub struct ContentBinding {
    pub binding: String,
    #[serde(default)]
    pub subtypes: Vec<String>,
}

/// Accepted config/JSON shapes for a binding: a bare id, an
/// `[id, [subtypes]]` pair, or the full object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ContentBindingRepr {
    Id(String),
    Pair(String, Vec<String>),
    Full {
        binding: String,
        #[serde(default)]
        subtypes: Option<Vec<String>>,
    },
}

impl From<ContentBindingRepr> for ContentBinding {
    fn from(repr: ContentBindingRepr) -> Self {
        match repr {
            ContentBindingRepr::Id(binding) => Self::new(binding),
            ContentBindingRepr::Pair(binding, subtypes) => Self::with_subtypes(binding, subtypes),
            ContentBindingRepr::Full { binding, subtypes } => {
                Self::with_subtypes(binding, subtypes.unwrap_or_default())
            },
        }
    }
}

impl ContentBinding {
    pub fn new(binding: impl Into<String>) -> Self {
        Self {
            binding: binding.into(),
            subtypes: Vec::new(),
        }
    }

    pub fn with_subtypes<I, S>(binding: impl Into<String>, subtypes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            binding: binding.into(),
            subtypes: subtypes.into_iter().map(Into::into).collect(),
        }
    }

    /// The single subtype a stored content block carries, if any.
    pub fn subtype(&self) -> Option<&str> {
        self.subtypes.first().map(String::as_str)
    }
}

impl std::fmt::Display for ContentBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.subtypes.is_empty() {
            write!(f, "{}", self.binding)
        } else {
            write!(f, "{}[{}]", self.binding, self.subtypes.join(","))
        }
    }
}

/// Match the bindings a client requested against the bindings a collection
/// supports.
///
/// - `accept_all` or an empty `supported` set returns `requested` unchanged.
/// - An empty `requested` list returns `supported` unchanged.
/// - Otherwise every `(requested, supported)` pair with the same binding id
///   contributes one entry, in request order. Subtypes are narrowed to the
///   intersection of both lists; an empty intersection contributes nothing.
///
/// An empty result is not an error here: the caller decides whether
/// "nothing compatible" is fatal.
pub fn match_bindings(
    supported: &[ContentBinding],
    requested: &[ContentBinding],
    accept_all: bool,
) -> Vec<ContentBinding> {
    if accept_all || supported.is_empty() {
        return requested.to_vec();
    }
    if requested.is_empty() {
        return supported.to_vec();
    }

    let mut overlap = Vec::new();
    for req in requested {
        for sup in supported.iter().filter(|s| s.binding == req.binding) {
            if sup.subtypes.is_empty() {
                overlap.push(req.clone());
                continue;
            }
            if req.subtypes.is_empty() {
                overlap.push(sup.clone());
                continue;
            }
            let common: Vec<String> = req
                .subtypes
                .iter()
                .filter(|s| sup.subtypes.contains(s))
                .cloned()
                .collect();
            if !common.is_empty() {
                overlap.push(ContentBinding::with_subtypes(req.binding.clone(), common));
            }
        }
    }
    overlap
}

/// Whether a single content block binding is accepted by a supported set.
///
/// A supported entry with no subtypes accepts every subtype of its binding;
/// otherwise the block's subtype must be listed.
pub fn is_content_supported(supported: &[ContentBinding], binding: &ContentBinding) -> bool {
    supported.iter().any(|s| {
        s.binding == binding.binding
            && (s.subtypes.is_empty()
                || binding
                    .subtype()
                    .is_some_and(|sub| s.subtypes.iter().any(|x| x == sub)))
    })
}
