// ── Queue configuration validation ──
//
// Bandwidth queues are written to the router with free-text kind and
// rate fields that legacy data has polluted over the years. Everything
// here is total: a caller always gets back something the router will
// accept, trading precision for robustness against garbage input.

use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

use wispctl_api::Param;

/// The closed set of queue kinds the router recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr, EnumString, EnumIter)]
pub enum QueueKind {
    #[strum(serialize = "default")]
    Default,
    #[strum(serialize = "default-small")]
    DefaultSmall,
    #[strum(serialize = "ethernet-default")]
    Ethernet,
    #[strum(serialize = "wireless-default")]
    Wireless,
    #[strum(serialize = "synchronous-default")]
    Synchronous,
    #[strum(serialize = "hotspot-default")]
    Hotspot,
    #[strum(serialize = "pcq-upload-default")]
    PcqUpload,
    #[strum(serialize = "pcq-download-default")]
    PcqDownload,
    #[strum(serialize = "only-hardware-queue")]
    OnlyHardwareQueue,
    #[strum(serialize = "multi-queue-ethernet-default")]
    MultiQueueEthernet,
}

impl QueueKind {
    /// Normalize a legacy free-text kind into the closed set.
    ///
    /// Exact matches pass through. Otherwise ordered heuristics apply:
    /// anything mentioning `pcq` becomes the PCQ default for its
    /// direction, anything mentioning `upload`/`download` becomes the
    /// small default, and the final fallback is the small default. Never
    /// fails.
    pub fn normalize_legacy(name: &str) -> Self {
        let trimmed = name.trim();
        if let Ok(kind) = trimmed.parse::<Self>() {
            return kind;
        }

        let lower = trimmed.to_lowercase();
        if lower.contains("pcq") {
            if lower.contains("up") {
                return Self::PcqUpload;
            }
            return Self::PcqDownload;
        }
        if lower.contains("upload") || lower.contains("download") {
            return Self::DefaultSmall;
        }

        Self::DefaultSmall
    }

    /// Every recognized kind, for diagnostics.
    pub fn all() -> impl Iterator<Item = Self> {
        Self::iter()
    }
}

/// Sanitize a rate/limit field.
///
/// Empty and the literal `"0"` mean "unset" and become `None`; otherwise
/// the value is returned with all whitespace stripped (legacy rows contain
/// values like `"10M "` and `"2 M"`).
pub fn sanitize_limit(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed == "0" {
        return None;
    }
    Some(trimmed.chars().filter(|c| !c.is_whitespace()).collect())
}

/// Sanitize a time field.
///
/// Bare numbers get the default seconds suffix; anything already carrying
/// a unit passes through unchanged; empty becomes `None`.
pub fn sanitize_time(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Some(format!("{trimmed}s"));
    }
    Some(trimmed.to_owned())
}

/// Bandwidth queue parameters, constructed per write and validated before
/// transmission. Never persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueSpec {
    pub name: String,
    pub parent: String,
    pub kind: QueueKind,
    pub max_limit: Option<String>,
    pub limit_at: Option<String>,
    pub burst_limit: Option<String>,
    pub burst_threshold: Option<String>,
    pub burst_time: Option<String>,
    pub comment: Option<String>,
}

impl QueueSpec {
    pub fn new(name: impl Into<String>, parent: impl Into<String>, kind: QueueKind) -> Self {
        Self {
            name: name.into(),
            parent: parent.into(),
            kind,
            max_limit: None,
            limit_at: None,
            burst_limit: None,
            burst_threshold: None,
            burst_time: None,
            comment: None,
        }
    }

    /// Apply field-level sanitization and burst-coherence rules.
    ///
    /// A burst threshold or time without a burst limit is stripped
    /// entirely: the router rejects partial burst configuration, so the
    /// fields are omitted rather than patched with invented values.
    pub fn pre_validate(mut self) -> Self {
        self.max_limit = self.max_limit.as_deref().and_then(sanitize_limit);
        self.limit_at = self.limit_at.as_deref().and_then(sanitize_limit);
        self.burst_limit = self.burst_limit.as_deref().and_then(sanitize_limit);
        self.burst_threshold = self.burst_threshold.as_deref().and_then(sanitize_limit);
        self.burst_time = self.burst_time.as_deref().and_then(sanitize_time);

        if self.burst_limit.is_none() {
            self.burst_threshold = None;
            self.burst_time = None;
        }

        self
    }

    /// Wire parameters for a queue-tree add.
    pub(crate) fn params(&self) -> Vec<Param> {
        let mut params = vec![
            Param::attr("name", self.name.as_str()),
            Param::attr("parent", self.parent.as_str()),
            Param::attr("queue", self.kind.as_ref()),
        ];
        let optional = [
            ("max-limit", &self.max_limit),
            ("limit-at", &self.limit_at),
            ("burst-limit", &self.burst_limit),
            ("burst-threshold", &self.burst_threshold),
            ("burst-time", &self.burst_time),
            ("comment", &self.comment),
        ];
        for (key, value) in optional {
            if let Some(v) = value {
                params.push(Param::attr(key, v.as_str()));
            }
        }
        params
    }
}
