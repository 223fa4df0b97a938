//! User model: an authenticated identity, its credentials, and the set of
//! remote addresses it is allowed to request.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A loaded user, with compiled ACL patterns.
///
/// `has_access` performs unanchored, first-match-wins matching. This means a
/// pattern like `^9001` also admits a host string containing `8009001`
/// anywhere after the start — preserved deliberately (see design notes §9);
/// port strings never embed this sequence in practice, but a future ACL
/// author should be aware the match is not implicitly anchored at both ends.
#[derive(Debug, Clone)]
pub struct User {
    pub name: String,
    pub pass: String,
    pub addrs: Vec<Regex>,
    pub is_admin: bool,
}

impl User {
    /// Construct and validate a user from raw fields.
    pub fn new(
        name: impl Into<String>,
        pass: impl Into<String>,
        addr_patterns: Vec<String>,
        is_admin: bool,
    ) -> Result<Self, Error> {
        let name = name.into();
        let pass = pass.into();
        validate_name(&name)?;
        validate_pass(&pass)?;
        if addr_patterns.is_empty() {
            return Err(Error::InvalidUser(format!(
                "invalid user setting for {name}: addrs must not be empty"
            )));
        }
        let mut addrs = Vec::with_capacity(addr_patterns.len());
        for pattern in &addr_patterns {
            if pattern.is_empty() {
                return Err(Error::InvalidUser(format!(
                    "invalid user setting for {name}: address pattern must not be empty"
                )));
            }
            let re = Regex::new(pattern).map_err(|e| {
                Error::InvalidUser(format!(
                    "invalid user setting for {name}: bad address pattern '{pattern}': {e}"
                ))
            })?;
            addrs.push(re);
        }
        Ok(Self {
            name,
            pass,
            addrs,
            is_admin,
        })
    }

    /// True iff any ACL pattern matches `addr` (unanchored, first match wins).
    pub fn has_access(&self, addr: &str) -> bool {
        self.addrs.iter().any(|re| re.is_match(addr))
    }

    fn addr_patterns(&self) -> Vec<String> {
        self.addrs.iter().map(|r| r.as_str().to_string()).collect()
    }
}

fn validate_name(name: &str) -> Result<(), Error> {
    if name.is_empty() {
        return Err(Error::InvalidUser("name must not be empty".to_string()));
    }
    if !name.chars().all(|c| c.is_alphanumeric()) {
        return Err(Error::InvalidUser(format!(
            "invalid user setting for {name}: name must be letters and digits only"
        )));
    }
    Ok(())
}

fn validate_pass(pass: &str) -> Result<(), Error> {
    if pass.chars().count() < 8 {
        return Err(Error::InvalidUser(
            "password must be at least 8 characters".to_string(),
        ));
    }
    Ok(())
}

/// The modern on-disk/wire shape: `{username, password, addresses: [...], is_admin}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl From<&User> for UserRecord {
    fn from(u: &User) -> Self {
        Self {
            username: u.name.clone(),
            password: u.pass.clone(),
            addresses: u.addr_patterns(),
            is_admin: u.is_admin,
        }
    }
}

impl TryFrom<UserRecord> for User {
    type Error = Error;

    fn try_from(r: UserRecord) -> Result<Self, Error> {
        User::new(r.username, r.password, r.addresses, r.is_admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(addrs: &[&str]) -> Result<User, Error> {
        User::new(
            "foo",
            "bar12345",
            addrs.iter().map(|s| s.to_string()).collect(),
            false,
        )
    }

    #[test]
    fn valid_user_validates() {
        assert!(user(&[".*"]).is_ok());
    }

    #[test]
    fn rejects_short_password() {
        let err = User::new("foo", "short", vec![".*".to_string()], false);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_alphanumeric_name() {
        let err = User::new("f oo", "bar12345", vec![".*".to_string()], false);
        assert!(err.is_err());
    }

    #[test]
    fn rejects_empty_addrs() {
        assert!(user(&[]).is_err());
    }

    #[test]
    fn has_access_is_unanchored() {
        let u = user(&["^9001"]).unwrap();
        assert!(u.has_access("9001:0.0.0.0->80:x"));
        assert!(u.has_access("8009001")); // documented hazard
        assert!(!u.has_access("8080:0.0.0.0->80:x"));
    }

    #[test]
    fn has_access_first_match_any() {
        let u = User::new(
            "ping",
            "pong1234",
            vec!["^80[0-9]{2}".to_string()],
            false,
        )
        .unwrap();
        assert!(u.has_access("8001:0.0.0.0->80:x"));
        assert!(!u.has_access("9001:0.0.0.0->80:x"));
    }
}
