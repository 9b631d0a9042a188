use bytes::Bytes;
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use uuid::Uuid;

/// Status code handed to callbacks when no HTTP response was obtained.
pub const FAILURE_STATUS: u16 = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
    Head,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
        }
    }

    /// Methods whose requests conventionally carry a body.
    pub fn carries_body(&self) -> bool {
        matches!(self, Method::Post | Method::Put)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMethodError(String);

impl fmt::Display for ParseMethodError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Unsupported HTTP method '{}' (expected GET, POST, PUT, DELETE or HEAD)",
            self.0
        )
    }
}

impl std::error::Error for ParseMethodError {}

impl FromStr for Method {
    type Err = ParseMethodError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            "HEAD" => Ok(Method::Head),
            _ => Err(ParseMethodError(s.to_string())),
        }
    }
}

/// Ordered list of request headers.
///
/// Insertion order is kept and duplicate names are allowed; how duplicates
/// are put on the wire is left to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// All values recorded for `name`, compared case-insensitively.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}

/// Everything needed to perform one HTTP call.
///
/// Fields are private and only exposed through read-only accessors, so a
/// descriptor cannot change once built. The body is reference counted:
/// clones share the same immutable buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    uri: String,
    method: Method,
    headers: Headers,
    body: Option<Bytes>,
}

impl RequestDescriptor {
    pub fn new(uri: impl Into<String>, method: Method) -> Self {
        Self::with_headers(uri, method, Headers::new())
    }

    pub fn with_headers(uri: impl Into<String>, method: Method, headers: Headers) -> Self {
        Self {
            uri: uri.into(),
            method,
            headers,
            body: None,
        }
    }

    pub fn with_body(
        uri: impl Into<String>,
        method: Method,
        headers: Headers,
        body: impl Into<Bytes>,
    ) -> Self {
        Self {
            uri: uri.into(),
            method,
            headers,
            body: Some(body.into()),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> Option<&Bytes> {
        self.body.as_ref()
    }
}

/// Status code and decoded text of a completed call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextResponse {
    pub status: u16,
    pub body: String,
}

impl TextResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn failure() -> Self {
        Self::new(FAILURE_STATUS, String::new())
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_failure(&self) -> bool {
        self.status == FAILURE_STATUS
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(Uuid);

impl RequestId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Queued,
    InFlight,
    Completed(Completion),
}

impl RequestState {
    /// `Queued -> InFlight -> Completed`, nothing else.
    pub fn can_transition_to(&self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Queued, RequestState::InFlight)
                | (RequestState::InFlight, RequestState::Completed(_))
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed(_))
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestState::Queued => write!(f, "queued"),
            RequestState::InFlight => write!(f, "in flight"),
            RequestState::Completed(Completion::Success) => write!(f, "completed"),
            RequestState::Completed(Completion::Failure) => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub id: RequestId,
    pub method: Method,
    pub uri: String,
    pub state: RequestState,
    pub queued_at: Instant,
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
}

impl RequestInfo {
    pub fn new(id: RequestId, method: Method, uri: String) -> Self {
        Self {
            id,
            method,
            uri,
            state: RequestState::Queued,
            queued_at: Instant::now(),
            started_at: None,
            finished_at: None,
        }
    }
}
