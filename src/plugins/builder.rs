//! Builder plugin: push container images to a registry.
//!
//! The build backend is an external collaborator behind [`BuildBackend`];
//! the default one drives the `docker` CLI.

use crate::core::action::Action;
use crate::core::call::{FnCall, FnRef};
use crate::core::context::ExecutionContext;
use crate::core::error::{Error, Result, ResultExt};
use crate::core::expr::{eval_string, expect_string, Expr};
use crate::core::marshal::CodeMarshaler;
use crate::core::value::{Record, TypeName, Value};
use crate::transport::local::exec_local;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Package name used in generated code.
pub const KEY: &str = "builder";

const PUSH: FnRef = FnRef::new("builder.Push");

const DEFAULT_DOMAIN: &str = "docker.io";
const OFFICIAL_REPO_PREFIX: &str = "library/";
const DEFAULT_TAG: &str = "latest";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuilderConfig {
    /// Allow plain-HTTP registries
    #[serde(default)]
    pub insecure: bool,

    /// Docker CLI used by the default backend
    #[serde(default = "default_docker")]
    pub docker: String,
}

fn default_docker() -> String {
    "docker".to_string()
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            insecure: false,
            docker: default_docker(),
        }
    }
}

/// Image descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub tag: String,
}

impl Image {
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    /// Validate the tag and normalize it to a fully qualified reference.
    pub fn check_and_set_defaults(&mut self) -> Result<()> {
        if self.tag.is_empty() {
            return Err(Error::bad_parameter("set Image{Tag:``} parameter"));
        }
        self.tag = normalize_reference(&self.tag)?;
        Ok(())
    }
}

impl fmt::Display for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Image(tag={})", self.tag)
    }
}

const DOMAIN_PATTERN: &str =
    r"^[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)*(?::[0-9]+)?$";
const REMAINDER_PATTERN: &str = concat!(
    r"^(?P<path>[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*)*)",
    r"(?::(?P<tag>[\w][\w.-]{0,127}))?",
    r"(?:@(?P<digest>sha256:[a-f0-9]{64}))?$",
);

/// Normalize an image reference: `nginx` becomes
/// `docker.io/library/nginx:latest`. References with a digest keep it
/// and get no default tag.
pub fn normalize_reference(image: &str) -> Result<String> {
    let bad = |why: &str| Error::bad_parameter(format!("parsing image name {:?} failed: {}", image, why));
    if image.is_empty() {
        return Err(bad("empty reference"));
    }

    let (domain, remainder) = match image.split_once('/') {
        Some((d, r)) if d.contains('.') || d.contains(':') || d == "localhost" => (d, r.to_string()),
        _ => (DEFAULT_DOMAIN, image.to_string()),
    };
    let domain_re = Regex::new(DOMAIN_PATTERN).map_err(|e| Error::Internal(e.to_string()))?;
    if !domain_re.is_match(domain) {
        return Err(bad("invalid domain"));
    }

    let remainder_re = Regex::new(REMAINDER_PATTERN).map_err(|e| Error::Internal(e.to_string()))?;
    let caps = remainder_re
        .captures(&remainder)
        .ok_or_else(|| bad("invalid reference format"))?;
    let mut path = caps.name("path").map(|m| m.as_str().to_string()).unwrap_or_default();
    if domain == DEFAULT_DOMAIN && !path.contains('/') {
        path = format!("{}{}", OFFICIAL_REPO_PREFIX, path);
    }
    let tag = caps.name("tag").map(|m| m.as_str());
    let digest = caps.name("digest").map(|m| m.as_str());

    let mut out = format!("{}/{}", domain, path);
    match (tag, digest) {
        (None, None) => {
            out.push(':');
            out.push_str(DEFAULT_TAG);
        }
        (tag, digest) => {
            if let Some(t) = tag {
                out.push(':');
                out.push_str(t);
            }
            if let Some(d) = digest {
                out.push('@');
                out.push_str(d);
            }
        }
    }
    Ok(out)
}

/// A backend session that must run alongside a push.
#[async_trait]
pub trait BuilderSession: Send + Sync {
    fn id(&self) -> &str;

    /// Serve the session until it is closed or `cancel` fires.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

/// The build service images are pushed through.
#[async_trait]
pub trait BuildBackend: Send + Sync + fmt::Debug {
    async fn session(&self, image: &Image) -> Result<Box<dyn BuilderSession>>;

    async fn push(&self, image: &str, insecure: bool, cancel: CancellationToken) -> Result<()>;
}

/// The builder plugin.
#[derive(Debug)]
pub struct Builder {
    config: BuilderConfig,
    backend: Arc<dyn BuildBackend>,
}

impl Builder {
    pub fn new(config: BuilderConfig) -> Arc<Self> {
        let backend = Arc::new(DockerBackend::new(config.docker.clone()));
        Arc::new(Self { config, backend })
    }

    pub fn with_backend(config: BuilderConfig, backend: Arc<dyn BuildBackend>) -> Arc<Self> {
        Arc::new(Self { config, backend })
    }

    /// Push `image`. The backend session and the push run together; either
    /// failing stops the other.
    pub async fn push(&self, ctx: &ExecutionContext, mut image: Image) -> Result<()> {
        image.check_and_set_defaults()?;
        info!(parent: ctx.span(), "Pushing {}.", image);

        let session = self
            .backend
            .session(&image)
            .await
            .context("failed to create session")?;
        debug!(parent: ctx.span(), session = session.id(), "builder session");

        let group = ctx.process().token().child_token();
        let serve = async {
            let res = session.run(group.clone()).await;
            if res.is_err() {
                group.cancel();
            }
            res
        };
        let push = async {
            let res = self.backend.push(&image.tag, self.config.insecure, group.clone()).await;
            let closed = session.close().await;
            if res.is_err() {
                group.cancel();
            }
            res.and(closed)
        };
        tokio::try_join!(serve, push)?;

        info!(parent: ctx.span(), "Successfully pushed {}.", image.tag);
        Ok(())
    }
}

/// `builder.Push(builder.Image{Tag:...})`.
#[derive(Debug, Clone)]
pub struct Push {
    builder: Arc<Builder>,
    tag: Expr,
}

impl Push {
    pub fn new(builder: Arc<Builder>, tag: Expr) -> Result<Self> {
        expect_string(tag.as_ref()).context("expected image tag to be a string")?;
        Ok(Self { builder, tag })
    }

    fn image_record(&self) -> Record {
        Record::new(TypeName::new(KEY, "Image")).field("Tag", Value::Expr(self.tag.clone()))
    }
}

#[async_trait]
impl Action for Push {
    async fn run(&self, ctx: ExecutionContext) -> Result<ExecutionContext> {
        let tag = eval_string(&ctx, self.tag.as_ref()).await?;
        self.builder.push(&ctx, Image::new(tag)).await?;
        Ok(ctx)
    }

    fn code(&self) -> Option<&dyn CodeMarshaler> {
        Some(self)
    }
}

#[async_trait]
impl CodeMarshaler for Push {
    async fn marshal_code(&self, ctx: &ExecutionContext) -> Result<Vec<u8>> {
        FnCall::new(PUSH, vec![])
            .in_package(KEY)
            .arg(self.image_record())
            .marshal_code(ctx)
            .await
    }
}

/// Pushes through the local docker daemon.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    binary: String,
}

impl DockerBackend {
    pub fn new(binary: impl Into<String>) -> Self {
        Self { binary: binary.into() }
    }
}

static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// The docker CLI needs no session of its own; this one only tracks
/// whether it was closed.
struct DockerSession {
    id: String,
    closed: CancellationToken,
}

#[async_trait]
impl BuilderSession for DockerSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        tokio::select! {
            _ = self.closed.cancelled() => Ok(()),
            _ = cancel.cancelled() => Err(Error::Cancelled(format!("session {}", self.id))),
        }
    }

    async fn close(&self) -> Result<()> {
        self.closed.cancel();
        Ok(())
    }
}

#[async_trait]
impl BuildBackend for DockerBackend {
    async fn session(&self, _image: &Image) -> Result<Box<dyn BuilderSession>> {
        let n = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(DockerSession {
            id: format!("kiln-{}-{}", std::process::id(), n),
            closed: CancellationToken::new(),
        }))
    }

    async fn push(&self, image: &str, insecure: bool, cancel: CancellationToken) -> Result<()> {
        if insecure {
            warn!("insecure registries are configured in the docker daemon, not per push");
        }
        let args = vec!["push".to_string(), image.to_string()];
        let out = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled(format!("docker push {}", image))),
            out = exec_local(&self.binary, &args) => out?,
        };
        out.check(&format!("{} push {}", self.binary, image)).map(|_| ())
    }
}
