//! HTTP endpoint assertions.
//!
//! Requests follow redirects and never treat a 4xx/5xx status as a
//! transport error; the status is just another observed value. Basic
//! credentials come from `user:pass@` in the URL or from `http-set-auth`,
//! in that order.

use super::{ActionError, ActionResult, Context, arg, expect_state};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use recipe::{Action, Property, PropertyBag};
use std::sync::OnceLock;
use std::time::Duration;
use ureq::{Agent, RequestBuilder};
use url::Url;

const AUTH_KEY: &str = "http-auth";
const HEADERS_KEY: &str = "http-headers";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

fn agent() -> &'static Agent {
    static AGENT: OnceLock<Agent> = OnceLock::new();
    AGENT.get_or_init(|| {
        let config = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(REQUEST_TIMEOUT))
            .build();
        Agent::new_with_config(config)
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
}

impl Method {
    fn parse(raw: &str) -> Result<Self, ActionError> {
        match raw.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            "HEAD" => Ok(Self::Head),
            _ => Err(ActionError::Usage(format!(
                "unsupported HTTP method {raw:?} (GET, POST, PUT, PATCH, DELETE, HEAD)"
            ))),
        }
    }
}

/// A request built from action arguments and the command's properties.
struct Request {
    method: Method,
    url: String,
    headers: Vec<(String, String)>,
    payload: String,
}

impl Request {
    fn new(method: &str, raw_url: &str, payload: &str, props: &PropertyBag) -> Result<Self, ActionError> {
        let method = Method::parse(method)?;
        let mut url = Url::parse(raw_url)
            .map_err(|e| ActionError::Usage(format!("invalid URL {raw_url:?}: {e}")))?;

        let mut headers: Vec<(String, String)> = match props.get(HEADERS_KEY) {
            Some(Property::Map(map)) => map.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            _ => Vec::new(),
        };

        let credentials = if url.username().is_empty() {
            match props.get(AUTH_KEY) {
                Some(Property::Credentials { user, password }) => {
                    Some((user.clone(), password.clone()))
                }
                _ => None,
            }
        } else {
            let user = url.username().to_string();
            let password = url.password().unwrap_or_default().to_string();
            // Both setters only fail for URLs that cannot carry credentials.
            let _ = url.set_username("");
            let _ = url.set_password(None);
            Some((user, password))
        };

        if let Some((user, password)) = credentials {
            let token = STANDARD.encode(format!("{user}:{password}"));
            headers.push(("Authorization".to_string(), format!("Basic {token}")));
        }

        Ok(Self {
            method,
            url: url.to_string(),
            headers,
            payload: payload.to_string(),
        })
    }

    fn with_headers<B>(&self, mut builder: RequestBuilder<B>) -> RequestBuilder<B> {
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }

    fn send(&self) -> Result<Reply, ActionError> {
        log::debug!("HTTP {:?} {}", self.method, self.url);
        let agent = agent();
        let result = match self.method {
            Method::Get => self.with_headers(agent.get(&self.url)).call(),
            Method::Head => self.with_headers(agent.head(&self.url)).call(),
            Method::Delete => self.with_headers(agent.delete(&self.url)).call(),
            Method::Post => self
                .with_headers(agent.post(&self.url))
                .send(self.payload.as_str()),
            Method::Put => self
                .with_headers(agent.put(&self.url))
                .send(self.payload.as_str()),
            Method::Patch => self
                .with_headers(agent.patch(&self.url))
                .send(self.payload.as_str()),
        };

        let mut response = result.map_err(|e| {
            ActionError::Runtime(format!("{:?} request to {} failed: {e}", self.method, self.url))
        })?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = if self.method == Method::Head {
            String::new()
        } else {
            response.body_mut().read_to_string().map_err(|e| {
                ActionError::Runtime(format!("cannot read response from {}: {e}", self.url))
            })?
        };

        Ok(Reply {
            status,
            headers,
            body,
        })
    }
}

struct Reply {
    status: u16,
    headers: Vec<(String, String)>,
    body: String,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

fn request(action: &Action, ctx: &Context<'_>, payload_index: usize) -> Result<Request, ActionError> {
    let payload = action.args.get(payload_index).map_or("", String::as_str);
    Request::new(arg(action, 0), arg(action, 1), payload, ctx.props)
}

pub fn http_status(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let raw = arg(action, 2);
    let expected: u16 = raw
        .parse()
        .map_err(|_| ActionError::Usage(format!("invalid HTTP status {raw:?}")))?;
    let request = request(action, ctx, 3)?;
    let reply = request.send()?;
    let actual = reply.status;

    expect_state(
        action,
        actual == expected,
        || format!("{} status mismatch ({actual} ≠ {expected})", request.url),
        || format!("{} status is {expected}", request.url),
    )
}

pub fn http_header(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let name = arg(action, 2);
    let expected = arg(action, 3);
    let request = request(action, ctx, 4)?;
    let reply = request.send()?;
    let actual = reply.header(name);

    expect_state(
        action,
        actual == Some(expected),
        || match actual {
            Some(actual) => format!(
                "{} header {name} mismatch ({actual:?} ≠ {expected:?})",
                request.url
            ),
            None => format!("{} has no header {name}", request.url),
        },
        || format!("{} header {name} is {expected:?}", request.url),
    )
}

pub fn http_contains(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    let needle = arg(action, 2);
    let request = request(action, ctx, 3)?;
    let reply = request.send()?;

    expect_state(
        action,
        reply.body.contains(needle),
        || format!("{} response does not contain {needle:?}", request.url),
        || format!("{} response contains {needle:?}", request.url),
    )
}

pub fn http_set_auth(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    ctx.props.set(
        AUTH_KEY,
        Property::Credentials {
            user: arg(action, 0).to_string(),
            password: arg(action, 1).to_string(),
        },
    );
    Ok(())
}

pub fn http_set_header(action: &Action, ctx: &mut Context<'_>) -> ActionResult {
    ctx.props
        .insert_into_map(HEADERS_KEY, arg(action, 0), arg(action, 1));
    Ok(())
}
