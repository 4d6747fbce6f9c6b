use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use reqwest::{RequestBuilder, Url};
use tracing::{info, warn};

use crate::error::CoreError;

/// Where the daemon listens and how requests authenticate against it.
#[derive(Debug, Clone)]
pub struct RpcEndpoint {
    pub url: String,
    pub auth: RpcAuth,
    /// Outbound HTTP requests per second; a batch counts once. `None` means
    /// no limit.
    pub requests_per_second: Option<u32>,
}

impl RpcEndpoint {
    /// Unauthenticated, unthrottled endpoint at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            auth: RpcAuth::None,
            requests_per_second: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub enum RpcAuth {
    None,
    /// `rpcuser` / `rpcpassword` from the daemon's configuration.
    UserPass { user: String, pass: String },
    /// The `.cookie` file bitcoind rewrites on every start.
    Cookie(PathBuf),
}

impl RpcAuth {
    /// An explicit user and password win over a cookie file. Giving only one
    /// half of the pair is rejected.
    pub fn from_parts(
        user: Option<String>,
        pass: Option<String>,
        cookie_file: Option<PathBuf>,
    ) -> Result<Self, CoreError> {
        match (user, pass) {
            (Some(user), Some(pass)) => Ok(Self::UserPass { user, pass }),
            (None, None) => Ok(cookie_file.map_or(Self::None, Self::Cookie)),
            _ => Err(CoreError::Config(
                "rpc user and rpc pass must be given together".to_owned(),
            )),
        }
    }
}

// Passwords stay out of logs.
impl fmt::Debug for RpcAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::UserPass { user, .. } => f
                .debug_struct("UserPass")
                .field("user", user)
                .finish_non_exhaustive(),
            Self::Cookie(path) => f.debug_tuple("Cookie").field(path).finish(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
struct Credentials {
    user: String,
    pass: String,
}

/// Basic-auth credentials attached to every request.
///
/// Cookie credentials can be reloaded: a restarted daemon writes a new cookie
/// and rejects the old one with HTTP 401.
pub(super) struct Authenticator {
    cookie: Option<PathBuf>,
    current: RwLock<Option<Credentials>>,
}

impl Authenticator {
    pub(super) fn new(auth: RpcAuth) -> Result<Self, CoreError> {
        let (cookie, current) = match auth {
            RpcAuth::None => (None, None),
            RpcAuth::UserPass { user, pass } => (None, Some(Credentials { user, pass })),
            RpcAuth::Cookie(path) => {
                let credentials = read_cookie(&path).map_err(CoreError::Config)?;
                (Some(path), Some(credentials))
            }
        };
        Ok(Self {
            cookie,
            current: RwLock::new(current),
        })
    }

    pub(super) fn apply(&self, builder: RequestBuilder) -> RequestBuilder {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        match current.as_ref() {
            Some(c) => builder.basic_auth(&c.user, Some(&c.pass)),
            None => builder,
        }
    }

    /// Re-read the cookie file. Returns true if the credentials changed.
    pub(super) fn reload(&self) -> bool {
        let Some(path) = &self.cookie else {
            return false;
        };
        let fresh = match read_cookie(path) {
            Ok(fresh) => fresh,
            Err(err) => {
                warn!(error = %err, "cannot reload rpc cookie");
                return false;
            }
        };

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_ref() == Some(&fresh) {
            return false;
        }
        *current = Some(fresh);
        info!(path = %path.display(), "reloaded rpc cookie");
        true
    }
}

fn read_cookie(path: &Path) -> Result<Credentials, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("read rpc cookie {}: {e}", path.display()))?;
    match content.trim().split_once(':') {
        Some((user, pass)) if !user.is_empty() && !pass.is_empty() => Ok(Credentials {
            user: user.to_owned(),
            pass: pass.to_owned(),
        }),
        _ => Err(format!(
            "rpc cookie {} does not hold `user:password`",
            path.display()
        )),
    }
}

pub(super) fn parse_url(raw: &str) -> Result<Url, CoreError> {
    let url = Url::parse(raw).map_err(|e| CoreError::Config(format!("rpc url `{raw}`: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CoreError::Config(format!(
            "rpc url `{raw}` must use http or https"
        )));
    }
    Ok(url)
}

/// `url` without any userinfo, for logging.
pub(super) fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let _ = shown.set_username("");
    let _ = shown.set_password(None);
    shown.to_string()
}
