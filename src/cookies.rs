//! Cookie parsing and `Set-Cookie` serialization (RFC 6265).

use std::fmt;
use std::time::{Duration, SystemTime};

use httpdate::fmt_http_date;

/// Expiry date used to delete a cookie on the client.
pub const EXPIRES_EPOCH: &'static str = "Thu, 01 Jan 1970 00:00:00 GMT";

/// A single cookie with its recognized attributes.
///
/// A cookie is valid iff both name and value are non-empty; invalid cookies
/// are skipped when the response is serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cookie {
    name: String,
    value: String,
    max_age: i64,
    expires: String,
    path: String,
    domain: String,
    secure: bool,
    http_only: bool,
}

impl Cookie {
    pub fn new<N, V>(name: N, value: V) -> Cookie
        where N: Into<String>, V: Into<String>
    {
        Cookie {
            name: name.into(),
            value: value.into(),
            max_age: -1,
            ..Default::default()
        }
    }

    /// Parses one cookie from a `Cookie:` or `Set-Cookie:` style string.
    ///
    /// Segments are separated by `;`. The first `key=value` pair whose key
    /// is not a recognized attribute becomes the (name, value) pair;
    /// `path`, `domain`, `max-age` and `expires` (case-insensitive)
    /// populate the attribute block, and the bare tokens `secure` and
    /// `HttpOnly` set the matching flags.
    pub fn parse(cookie_string: &str) -> Cookie {
        let mut cookie = Cookie::new("", "");
        for segment in cookie_string.split(';') {
            let segment = segment.trim();
            if segment.is_empty() {
                continue;
            }
            match segment.find('=') {
                Some(eq) => {
                    let key = &segment[..eq];
                    let value = &segment[eq + 1..];
                    if key.eq_ignore_ascii_case("path") {
                        cookie.path = value.to_string();
                    } else if key.eq_ignore_ascii_case("domain") {
                        cookie.domain = value.to_string();
                    } else if key.eq_ignore_ascii_case("expires") {
                        cookie.expires = value.to_string();
                    } else if key.eq_ignore_ascii_case("max-age") {
                        cookie.max_age = value.parse().unwrap_or(0);
                    } else if cookie.name.is_empty() {
                        // only the first ordinary pair is retained
                        cookie.name = key.to_string();
                        cookie.value = value.to_string();
                    }
                }
                None => {
                    if segment.eq_ignore_ascii_case("secure") {
                        cookie.secure = true;
                    } else if segment.eq_ignore_ascii_case("HttpOnly") {
                        cookie.http_only = true;
                    }
                }
            }
        }
        cookie
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name<N: Into<String>>(&mut self, name: N) {
        self.name = name.into();
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn set_value<V: Into<String>>(&mut self, value: V) {
        self.value = value.into();
    }

    /// Max-Age in seconds; `-1` means "not set".
    pub fn max_age(&self) -> i64 {
        self.max_age
    }

    pub fn set_max_age(&mut self, max_age: i64) {
        self.max_age = max_age;
    }

    pub fn expires(&self) -> &str {
        &self.expires
    }

    pub fn set_expires<E: Into<String>>(&mut self, expires: E) {
        self.expires = expires.into();
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn set_path<P: Into<String>>(&mut self, path: P) {
        self.path = path.into();
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    pub fn set_domain<D: Into<String>>(&mut self, domain: D) {
        self.domain = domain.into();
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn set_secure(&mut self, secure: bool) {
        self.secure = secure;
    }

    pub fn http_only(&self) -> bool {
        self.http_only
    }

    pub fn set_http_only(&mut self, http_only: bool) {
        self.http_only = http_only;
    }

    pub fn valid(&self) -> bool {
        !self.name.is_empty() && !self.value.is_empty()
    }

    pub fn reset(&mut self) {
        *self = Cookie::new("", "");
    }
}

impl fmt::Display for Cookie {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)?;
        if !self.path.is_empty() {
            write!(f, "; path={}", self.path)?;
        }
        if !self.domain.is_empty() {
            write!(f, "; domain={}", self.domain)?;
        }
        if self.max_age != -1 {
            write!(f, "; Max-Age={}", self.max_age)?;
            if self.expires.is_empty() {
                let when = if self.max_age >= 0 {
                    SystemTime::now()
                        + Duration::from_secs(self.max_age as u64)
                } else {
                    SystemTime::now()
                };
                write!(f, "; expires={}", fmt_http_date(when))?;
            }
        }
        if !self.expires.is_empty() {
            write!(f, "; expires={}", self.expires)?;
        }
        if self.secure {
            write!(f, "; secure")?;
        }
        if self.http_only {
            write!(f, "; HttpOnly")?;
        }
        Ok(())
    }
}

/// Per-request cookie state: the cookie parsed from the inbound `Cookie`
/// header plus the ordered list of outbound `Set-Cookie` entries.
#[derive(Debug, Default)]
pub struct CookieJar {
    inbound: Cookie,
    outbound: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> CookieJar {
        CookieJar::default()
    }

    /// Value of the inbound cookie when its name matches.
    pub fn get(&self, name: &str) -> Option<&str> {
        if !self.inbound.name.is_empty() && self.inbound.name == name {
            Some(&self.inbound.value)
        } else {
            None
        }
    }

    pub fn parse(&mut self, cookie_string: &str) {
        self.inbound = Cookie::parse(cookie_string);
    }

    pub fn inbound(&self) -> &Cookie {
        &self.inbound
    }

    /// Queues a `Set-Cookie` entry for the response.
    pub fn set(&mut self, cookie: Cookie) {
        self.outbound.push(cookie);
    }

    pub fn outbound(&self) -> &[Cookie] {
        &self.outbound
    }

    pub fn reset(&mut self) {
        self.inbound.reset();
        self.outbound.clear();
    }
}
