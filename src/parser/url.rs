//! Request-target parser.
//!
//! A single grammar is used for every request form; its accept set is the
//! stricter of the common HTTP parser implementations so that the message
//! parser and the URL accessor can not drift apart.

/// A parsed request-target.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Url {
    pub schema: Option<String>,
    pub userinfo: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
    pub fragment: Option<String>,
}

fn is_url_char(c: u8) -> bool {
    c > 0x20 && c != 0x7f
}

fn is_host_char(c: u8) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, b'-' | b'.' | b'_' | b'~' | b'%')
}

fn is_userinfo_char(c: u8) -> bool {
    is_host_char(c)
        || matches!(c,
            b'!' | b'$' | b'&' | b'\'' | b'(' | b')' | b'*' | b'+' | b','
            | b';' | b'=' | b':')
}

fn is_ipv6_char(c: u8) -> bool {
    c.is_ascii_hexdigit() || c == b':' || c == b'.'
}

impl Url {
    /// Parses a request-target.
    ///
    /// A `CONNECT` target must be exactly `host:port` with a port that fits
    /// 16 bits; everything else for it is rejected.
    pub fn parse(input: &str, is_connect: bool) -> Result<Url, ()> {
        if input.is_empty() || !input.bytes().all(is_url_char) {
            return Err(());
        }
        if is_connect {
            let (userinfo, host, port) = parse_authority(input)?;
            if userinfo.is_some() || port.is_none() {
                return Err(());
            }
            return Ok(Url {
                host: Some(host),
                port: port,
                ..Default::default()
            });
        }
        if input == "*" {
            return Ok(Url { path: "*".to_string(), ..Default::default() });
        }
        if input.starts_with('/') {
            return Ok(parse_path(input, Url::default()));
        }
        // absolute-form: schema "://" authority path-and-rest
        let scheme_end = input.find("://").ok_or(())?;
        let schema = &input[..scheme_end];
        let mut chars = schema.bytes();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() => {}
            _ => return Err(()),
        }
        if !chars.all(|c| c.is_ascii_alphanumeric() || c == b'+' || c == b'-')
        {
            return Err(());
        }
        let rest = &input[scheme_end + 3..];
        let authority_end = rest
            .find(|c| c == '/' || c == '?' || c == '#')
            .unwrap_or(rest.len());
        let (userinfo, host, port) = parse_authority(&rest[..authority_end])?;
        let mut url = Url {
            schema: Some(schema.to_string()),
            userinfo: userinfo,
            host: Some(host),
            port: port,
            ..Default::default()
        };
        let tail = &rest[authority_end..];
        if tail.is_empty() {
            url.path = "/".to_string();
            Ok(url)
        } else {
            Ok(parse_path(tail, url))
        }
    }
}

fn parse_path(input: &str, mut url: Url) -> Url {
    let (before_fragment, fragment) = match input.find('#') {
        Some(pos) => (&input[..pos], Some(input[pos + 1..].to_string())),
        None => (input, None),
    };
    let (path, query) = match before_fragment.find('?') {
        Some(pos) => {
            (&before_fragment[..pos],
             Some(before_fragment[pos + 1..].to_string()))
        }
        None => (before_fragment, None),
    };
    url.path = path.to_string();
    url.query = query;
    url.fragment = fragment;
    url
}

fn parse_authority(input: &str)
    -> Result<(Option<String>, String, Option<u16>), ()>
{
    if input.is_empty() {
        return Err(());
    }
    let (userinfo, hostport) = match input.rfind('@') {
        Some(pos) => {
            let info = &input[..pos];
            if info.is_empty() || !info.bytes().all(is_userinfo_char) {
                return Err(());
            }
            (Some(info.to_string()), &input[pos + 1..])
        }
        None => (None, input),
    };
    let (host, port_str) = if hostport.starts_with('[') {
        // IPv6 literal, optionally with a zone id after '%'
        let close = hostport.find(']').ok_or(())?;
        let literal = &hostport[1..close];
        let (addr, zone) = match literal.find('%') {
            Some(pos) => (&literal[..pos], Some(&literal[pos + 1..])),
            None => (literal, None),
        };
        if addr.is_empty() || !addr.bytes().all(is_ipv6_char) {
            return Err(());
        }
        if let Some(zone) = zone {
            if zone.is_empty() || !zone.bytes().all(is_host_char) {
                return Err(());
            }
        }
        let rest = &hostport[close + 1..];
        if rest.is_empty() {
            (hostport[..close + 1].to_string(), None)
        } else if rest.starts_with(':') {
            (hostport[..close + 1].to_string(), Some(&rest[1..]))
        } else {
            return Err(());
        }
    } else {
        match hostport.find(':') {
            Some(pos) => {
                (hostport[..pos].to_string(), Some(&hostport[pos + 1..]))
            }
            None => (hostport.to_string(), None),
        }
    };
    if host.is_empty() || (!host.starts_with('[')
        && !host.bytes().all(is_host_char))
    {
        return Err(());
    }
    let port = match port_str {
        Some(digits) => {
            if digits.is_empty() || !digits.bytes().all(|c| c.is_ascii_digit())
            {
                return Err(());
            }
            let value: u32 = digits.parse().map_err(|_| ())?;
            if value > 0xffff {
                return Err(());
            }
            Some(value as u16)
        }
        None => None,
    };
    Ok((userinfo, host, port))
}
