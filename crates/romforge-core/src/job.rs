//! Build jobs and submission validation.
//!
//! A [`JobRequest`] is the raw, untrusted submission coming from the command
//! layer. [`JobRequest::validate`] turns it into a [`Job`], whose fields are
//! typed so that an invalid device path or unknown target cannot exist past
//! this point.

use chrono::{DateTime, Utc};
use derive_more::{Display, From};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use url::Url;

use crate::{Error, JobId, Result};

/// Opaque identity of whoever submitted a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct RequesterId(i64);

impl RequesterId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

/// A delivery channel on the chat transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From)]
#[display("{_0}")]
pub struct ChannelId(i64);

impl ChannelId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

/// Requesters are reachable through their private channel.
impl From<RequesterId> for ChannelId {
    fn from(requester: RequesterId) -> Self {
        Self(requester.0)
    }
}

/// A buildable image, drawn from a fixed allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
    Recovery,
    Boot,
    VendorBoot,
}

impl Target {
    pub const ALL: [Target; 3] = [Target::Recovery, Target::Boot, Target::VendorBoot];

    /// Name used on the command line and for the output image.
    pub fn name(&self) -> &'static str {
        match self {
            Target::Recovery => "recovery",
            Target::Boot => "boot",
            Target::VendorBoot => "vendor_boot",
        }
    }

    /// Goal passed to the toolchain to produce this target.
    pub fn goal(&self) -> &'static str {
        match self {
            Target::Recovery => "recoveryimage",
            Target::Boot => "bootimage",
            Target::VendorBoot => "vendorbootimage",
        }
    }

    /// File name of the image the toolchain leaves in the product directory.
    pub fn image_file_name(&self) -> String {
        format!("{}.img", self.name())
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Target::ALL
            .into_iter()
            .find(|t| t.name() == s)
            .ok_or_else(|| Error::Validation(format!("Invalid targets: {}", s)))
    }
}

/// Repository URL a job is built from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    /// Accept `raw` only if it starts with one of `allowed_prefixes` and is a valid URL.
    pub fn parse<S: AsRef<str>>(raw: &str, allowed_prefixes: &[S]) -> Result<Self> {
        let allowed = allowed_prefixes
            .iter()
            .any(|prefix| raw.starts_with(prefix.as_ref()));
        if !allowed {
            return Err(Error::Validation(format!(
                "source must start with one of: {}",
                allowed_prefixes
                    .iter()
                    .map(|p| p.as_ref())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        Url::parse(raw).map_err(|e| Error::Validation(format!("invalid source url: {}", e)))?;

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path segment of the URL, used in progress notices.
    pub fn repository_name(&self) -> &str {
        self.0
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(&self.0)
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Slash-separated device path, relative to `<root>/device`.
///
/// Never absolute and never contains empty, `.` or `..` segments, so joining it
/// onto the workspace root cannot escape that root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DevicePath(String);

impl DevicePath {
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(Error::Validation("device path is empty".to_string()));
        }
        if raw.starts_with('/') {
            return Err(Error::Validation(format!(
                "device path must be relative: {}",
                raw
            )));
        }
        for segment in raw.split('/') {
            match segment {
                ".." => {
                    return Err(Error::Validation(format!(
                        "device path must not leave the workspace: {}",
                        raw
                    )));
                }
                "" | "." => {
                    return Err(Error::Validation(format!(
                        "device path has an empty segment: {}",
                        raw
                    )));
                }
                _ => {}
            }
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Build-environment identifier: the final path segment.
    pub fn codename(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }
}

impl fmt::Display for DevicePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An unvalidated build submission.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub requester: RequesterId,
    /// Channel that receives progress notices and artifacts.
    pub reply_to: ChannelId,
    pub source_ref: String,
    pub device_path: String,
    pub targets: Vec<String>,
}

impl JobRequest {
    /// Validate the request against the allowed source prefixes and the target allow-list.
    pub fn validate<S: AsRef<str>>(self, allowed_prefixes: &[S]) -> Result<Job> {
        let source = SourceRef::parse(&self.source_ref, allowed_prefixes)?;
        let device_path = DevicePath::parse(&self.device_path)?;

        if self.targets.is_empty() {
            return Err(Error::Validation(
                "at least one target is required".to_string(),
            ));
        }

        let invalid: Vec<&str> = self
            .targets
            .iter()
            .filter(|t| t.parse::<Target>().is_err())
            .map(String::as_str)
            .collect();
        if !invalid.is_empty() {
            return Err(Error::Validation(format!(
                "Invalid targets: {}",
                invalid.join(", ")
            )));
        }

        let mut targets: Vec<Target> = Vec::with_capacity(self.targets.len());
        for target in self.targets.iter().filter_map(|t| t.parse::<Target>().ok()) {
            if !targets.contains(&target) {
                targets.push(target);
            }
        }

        Ok(Job {
            id: JobId::new(),
            requester: self.requester,
            reply_to: self.reply_to,
            source,
            device_path,
            targets,
            submitted_at: Utc::now(),
        })
    }
}

/// One validated build request.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub requester: RequesterId,
    pub reply_to: ChannelId,
    pub source: SourceRef,
    pub device_path: DevicePath,
    /// Never empty; duplicates removed, submission order kept.
    pub targets: Vec<Target>,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn is_owned_by(&self, requester: RequesterId) -> bool {
        self.requester == requester
    }

    /// Toolchain goals for every requested target, in order.
    pub fn goals(&self) -> Vec<&'static str> {
        self.targets.iter().map(Target::goal).collect()
    }
}
