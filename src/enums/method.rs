use std::fmt;

/// Request methods recognized by the parser.
///
/// This is the fixed method alphabet; anything else is reported as
/// `invalid_method` by the wire parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Delete,
    Get,
    Head,
    Post,
    Put,
    Connect,
    Options,
    Trace,
    Copy,
    Lock,
    Mkcol,
    Move,
    Propfind,
    Proppatch,
    Search,
    Unlock,
    Bind,
    Rebind,
    Unbind,
    Acl,
    Report,
    Mkactivity,
    Checkout,
    Merge,
    MSearch,
    Notify,
    Subscribe,
    Unsubscribe,
    Patch,
    Purge,
    Mkcalendar,
    Link,
    Unlink,
    Source,
    Pri,
}

impl Method {
    /// Resolves a complete method token read from the request line.
    pub fn from_token(token: &[u8]) -> Option<Method> {
        use self::Method::*;
        let method = match token {
            b"DELETE" => Delete,
            b"GET" => Get,
            b"HEAD" => Head,
            b"POST" => Post,
            b"PUT" => Put,
            b"CONNECT" => Connect,
            b"OPTIONS" => Options,
            b"TRACE" => Trace,
            b"COPY" => Copy,
            b"LOCK" => Lock,
            b"MKCOL" => Mkcol,
            b"MOVE" => Move,
            b"PROPFIND" => Propfind,
            b"PROPPATCH" => Proppatch,
            b"SEARCH" => Search,
            b"UNLOCK" => Unlock,
            b"BIND" => Bind,
            b"REBIND" => Rebind,
            b"UNBIND" => Unbind,
            b"ACL" => Acl,
            b"REPORT" => Report,
            b"MKACTIVITY" => Mkactivity,
            b"CHECKOUT" => Checkout,
            b"MERGE" => Merge,
            b"M-SEARCH" => MSearch,
            b"NOTIFY" => Notify,
            b"SUBSCRIBE" => Subscribe,
            b"UNSUBSCRIBE" => Unsubscribe,
            b"PATCH" => Patch,
            b"PURGE" => Purge,
            b"MKCALENDAR" => Mkcalendar,
            b"LINK" => Link,
            b"UNLINK" => Unlink,
            b"SOURCE" => Source,
            b"PRI" => Pri,
            _ => return None,
        };
        Some(method)
    }

    pub fn as_str(&self) -> &'static str {
        use self::Method::*;
        match *self {
            Delete => "DELETE",
            Get => "GET",
            Head => "HEAD",
            Post => "POST",
            Put => "PUT",
            Connect => "CONNECT",
            Options => "OPTIONS",
            Trace => "TRACE",
            Copy => "COPY",
            Lock => "LOCK",
            Mkcol => "MKCOL",
            Move => "MOVE",
            Propfind => "PROPFIND",
            Proppatch => "PROPPATCH",
            Search => "SEARCH",
            Unlock => "UNLOCK",
            Bind => "BIND",
            Rebind => "REBIND",
            Unbind => "UNBIND",
            Acl => "ACL",
            Report => "REPORT",
            Mkactivity => "MKACTIVITY",
            Checkout => "CHECKOUT",
            Merge => "MERGE",
            MSearch => "M-SEARCH",
            Notify => "NOTIFY",
            Subscribe => "SUBSCRIBE",
            Unsubscribe => "UNSUBSCRIBE",
            Patch => "PATCH",
            Purge => "PURGE",
            Mkcalendar => "MKCALENDAR",
            Link => "LINK",
            Unlink => "UNLINK",
            Source => "SOURCE",
            Pri => "PRI",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::Method;

    #[test]
    fn known_tokens() {
        assert_eq!(Method::from_token(b"GET"), Some(Method::Get));
        assert_eq!(Method::from_token(b"M-SEARCH"), Some(Method::MSearch));
        assert_eq!(Method::from_token(b"CONNECT"), Some(Method::Connect));
    }

    #[test]
    fn unknown_tokens() {
        assert_eq!(Method::from_token(b"GETT"), None);
        assert_eq!(Method::from_token(b"get"), None);
        assert_eq!(Method::from_token(b""), None);
    }

    #[test]
    fn round_trip() {
        assert_eq!(Method::from_token(Method::Unsubscribe.as_str().as_bytes()),
            Some(Method::Unsubscribe));
    }
}
