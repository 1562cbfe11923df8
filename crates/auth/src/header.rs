use {
    base64::Engine,
    secrecy::{ExposeSecret, Secret},
    tracing::warn,
};

use crate::error::{Error, Result};

/// Credentials carried by an `Authorization` header.
#[derive(Debug)]
pub enum Credentials {
    Bearer(String),
    Basic {
        username: String,
        password: Secret<String>,
    },
}

impl PartialEq for Credentials {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bearer(a), Self::Bearer(b)) => a == b,
            (
                Self::Basic {
                    username: ua,
                    password: pa,
                },
                Self::Basic {
                    username: ub,
                    password: pb,
                },
            ) => ua == ub && pa.expose_secret() == pb.expose_secret(),
            _ => false,
        }
    }
}

impl Credentials {
    /// Parse an `Authorization` header value.
    ///
    /// A value without a scheme/credential pair, or a Basic credential that
    /// does not decode to `user:password`, is treated as absent. Basic is
    /// rejected outright unless `support_basic_auth` is set, as is any scheme
    /// other than Basic and Bearer.
    pub fn parse(value: &str, support_basic_auth: bool) -> Result<Option<Self>> {
        let Some((scheme, raw)) = value.trim().split_once(' ') else {
            warn!(value, "authorization header invalid");
            return Ok(None);
        };
        let raw = raw.trim();

        match scheme.to_ascii_lowercase().as_str() {
            "bearer" => {
                if raw.is_empty() {
                    return Err(Error::Unauthorized);
                }
                Ok(Some(Self::Bearer(raw.to_string())))
            },
            "basic" => {
                if !support_basic_auth {
                    return Err(Error::Unauthorized);
                }
                Ok(decode_basic(raw))
            },
            _ => Err(Error::Unauthorized),
        }
    }
}

fn decode_basic(raw: &str) -> Option<Credentials> {
    let decoded = match base64::engine::general_purpose::STANDARD.decode(raw) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(error = %e, "basic auth token is not base64");
            return None;
        },
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        warn!("basic auth token is not utf-8");
        return None;
    };
    let Some((username, password)) = decoded.split_once(':') else {
        warn!("basic auth token has no password separator");
        return None;
    };
    Some(Credentials::Basic {
        username: username.to_string(),
        password: Secret::new(password.to_string()),
    })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user_pass: &str) -> String {
        format!(
            "Basic {}",
            base64::engine::general_purpose::STANDARD.encode(user_pass)
        )
    }

    #[test]
    fn bearer_token_is_extracted() {
        let creds = Credentials::parse("Bearer abc.def", false).unwrap();
        assert_eq!(creds, Some(Credentials::Bearer("abc.def".into())));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        let creds = Credentials::parse("bEaReR tok", false).unwrap();
        assert_eq!(creds, Some(Credentials::Bearer("tok".into())));
    }

    #[test]
    fn value_without_credential_is_anonymous() {
        assert!(Credentials::parse("Bearer", false).unwrap().is_none());
        assert!(Credentials::parse("", true).unwrap().is_none());
    }

    #[test]
    fn basic_requires_opt_in() {
        let err = Credentials::parse(&basic("alice:secret"), false).unwrap_err();
        assert!(err.is_unauthorized());

        let creds = Credentials::parse(&basic("alice:se:cret"), true).unwrap();
        match creds {
            Some(Credentials::Basic { username, password }) => {
                assert_eq!(username, "alice");
                assert_eq!(password.expose_secret(), "se:cret");
            },
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_basic_is_anonymous() {
        assert!(Credentials::parse("Basic !!!", true).unwrap().is_none());
        assert!(
            Credentials::parse(&basic("no-separator"), true)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        let err = Credentials::parse("Digest realm=x", true).unwrap_err();
        assert!(err.is_unauthorized());
    }
}
