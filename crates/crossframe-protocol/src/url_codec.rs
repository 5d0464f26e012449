//! URL transport codec.
//!
//! Carries envelopes across full-page navigations. The id travels in the
//! query string so it survives the fragment being cleared and is visible to
//! a referrer check. Everything else (command, args, return address, status,
//! result) travels in the fragment, which never reaches a server and whose
//! changes never trigger another navigation.
//!
//! Decoding is pure: callers get the message plus the cleaned URL to put back
//! into history in place of the consumed one.

use url::form_urlencoded;
use url::Url;

use crate::codec::{self, CodecError};
use crate::request::{DeliveryMethod, RequestEnvelope, RequestId};
use crate::response::{ResponseEnvelope, ResponseMessage, ResponseStatus};
use crate::value::Value;
use crate::RETURN_URL_SENTINEL;

/// Query key carrying the request id.
pub const ID_KEY: &str = "id";

/// Fragment keys of an encoded request.
pub mod request_keys {
    pub const COMMAND: &str = "command";
    pub const RETURN_URL: &str = "returnURL";
    pub const ARGS: &str = "args";
    pub const RESPONSE_METHOD: &str = "responseMethod";
}

/// Fragment keys of an encoded response.
pub mod response_keys {
    pub const STATUS: &str = "status";
    pub const RESULT: &str = "result";
}

/// URL codec errors
#[derive(Debug, thiserror::Error)]
pub enum UrlCodecError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("Encoding failed: {0}")]
    Codec(#[from] CodecError),
}

/// Where a responder sends its reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnAddress {
    /// Navigate or post to this URL.
    Url(String),
    /// Message the opener or parent instead of navigating.
    PostMessage,
}

impl ReturnAddress {
    pub fn parse(s: &str) -> Self {
        if s == RETURN_URL_SENTINEL {
            ReturnAddress::PostMessage
        } else {
            ReturnAddress::Url(s.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ReturnAddress::Url(url) => url,
            ReturnAddress::PostMessage => RETURN_URL_SENTINEL,
        }
    }
}

/// A request recovered from a URL.
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectRequest {
    /// Origin of the referring page
    pub origin: String,
    pub data: RequestEnvelope,
    pub return_address: ReturnAddress,
    pub response_method: DeliveryMethod,
}

/// A decoded message and the location with its markers removed.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded<T> {
    pub message: T,
    pub cleaned: Url,
}

/// Build the URL that invokes `command` on the page at `target_url`.
///
/// Fragment content already present on the target is kept as form pairs, so
/// it comes back percent-encoded: a hash route such as `#/page` becomes
/// `#%2Fpage` both here and in the cleaned location. Pages that route on the
/// raw fragment should not be used as redirect targets or return URLs.
pub fn prepare_redirect_invocation(
    target_url: &str,
    id: RequestId,
    return_address: &ReturnAddress,
    command: &str,
    args: &[Value],
    response_method: DeliveryMethod,
) -> Result<String, UrlCodecError> {
    let mut url = Url::parse(target_url)?;
    set_query_id(&mut url, id);

    let mut fragment = fragment_pairs(&url);
    set_pair(&mut fragment, request_keys::COMMAND, command);
    set_pair(&mut fragment, request_keys::RETURN_URL, return_address.as_str());
    set_pair(&mut fragment, request_keys::ARGS, &codec::stringify(args)?);
    if response_method == DeliveryMethod::HttpPost {
        set_pair(&mut fragment, request_keys::RESPONSE_METHOD, response_method.as_str());
    }
    write_fragment(&mut url, &fragment);

    Ok(url.into())
}

/// Build the URL that carries a reply back to the caller's return URL.
pub fn prepare_redirect_reply(
    return_url: &str,
    id: RequestId,
    status: ResponseStatus,
    result: &Value,
) -> Result<String, UrlCodecError> {
    let mut url = Url::parse(return_url)?;
    set_query_id(&mut url, id);

    let mut fragment = fragment_pairs(&url);
    set_pair(&mut fragment, response_keys::STATUS, status.as_str());
    set_pair(&mut fragment, response_keys::RESULT, &codec::stringify(result)?);
    write_fragment(&mut url, &fragment);

    Ok(url.into())
}

/// Recover a request from the current location.
///
/// Returns `None` when the location carries no (acceptable) request: no
/// referrer, missing id/command/return address, a sentinel return address
/// without an opener or parent to answer, or a return URL whose origin
/// differs from the referrer's.
pub fn receive_redirect_command(
    location: &Url,
    referrer: Option<&str>,
    has_opener_or_parent: bool,
) -> Option<Decoded<RedirectRequest>> {
    let referrer = parse_referrer(referrer)?;
    let id = query_id(location)?;
    let fragment = fragment_pairs(location);

    let command = get_pair(&fragment, request_keys::COMMAND)?.to_string();
    let return_address = ReturnAddress::parse(get_pair(&fragment, request_keys::RETURN_URL)?);

    let response_method = match &return_address {
        ReturnAddress::PostMessage => {
            if !has_opener_or_parent {
                return None;
            }
            DeliveryMethod::InProcess
        }
        ReturnAddress::Url(return_url) => {
            let return_url = Url::parse(return_url).ok()?;
            if return_url.origin() != referrer.origin() {
                return None;
            }
            match get_pair(&fragment, request_keys::RESPONSE_METHOD).and_then(DeliveryMethod::parse) {
                Some(DeliveryMethod::HttpPost) => DeliveryMethod::HttpPost,
                _ => DeliveryMethod::RedirectGet,
            }
        }
    };

    let args = get_pair(&fragment, request_keys::ARGS)
        .and_then(|text| codec::parse::<Value>(text).ok())
        .and_then(|value| match value {
            Value::Array(items) => Some(items),
            _ => None,
        })
        .unwrap_or_default();

    let cleaned = strip_fragment_keys(
        location,
        &[
            request_keys::COMMAND,
            request_keys::RETURN_URL,
            request_keys::ARGS,
            request_keys::RESPONSE_METHOD,
        ],
    );

    Some(Decoded {
        message: RedirectRequest {
            origin: referrer.origin().ascii_serialization(),
            data: RequestEnvelope::new(id, command, args),
            return_address,
            response_method,
        },
        cleaned,
    })
}

/// Recover a response from the current location.
///
/// A malformed result degrades to `null` instead of dropping the response.
pub fn receive_redirect_response(
    location: &Url,
    referrer: Option<&str>,
) -> Option<Decoded<ResponseMessage>> {
    let referrer = parse_referrer(referrer)?;
    let id = query_id(location)?;
    let fragment = fragment_pairs(location);

    let status = ResponseStatus::parse(get_pair(&fragment, response_keys::STATUS)?);
    let result = codec::parse::<Value>(get_pair(&fragment, response_keys::RESULT)?).unwrap_or_default();

    let cleaned = strip_fragment_keys(location, &[response_keys::STATUS, response_keys::RESULT]);

    Some(Decoded {
        message: ResponseMessage {
            origin: referrer.origin().ascii_serialization(),
            data: ResponseEnvelope { id, status, result },
        },
        cleaned,
    })
}

/// The request id in the query string, if any.
pub fn query_id(location: &Url) -> Option<RequestId> {
    location
        .query_pairs()
        .find(|(key, _)| key == ID_KEY)
        .and_then(|(_, value)| value.parse().ok())
}

/// Return `location` with its query `id` set to `id`.
pub fn with_query_id(location: &Url, id: RequestId) -> Url {
    let mut url = location.clone();
    set_query_id(&mut url, id);
    url
}

fn parse_referrer(referrer: Option<&str>) -> Option<Url> {
    referrer.filter(|r| !r.is_empty()).and_then(|r| Url::parse(r).ok())
}

fn set_query_id(url: &mut Url, id: RequestId) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    set_pair(&mut pairs, ID_KEY, &id.to_string());
    url.query_pairs_mut().clear().extend_pairs(pairs.iter());
}

fn fragment_pairs(url: &Url) -> Vec<(String, String)> {
    url.fragment()
        .map(|fragment| form_urlencoded::parse(fragment.as_bytes()).into_owned().collect())
        .unwrap_or_default()
}

fn get_pair<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

/// Replace the first occurrence of `key`, dropping any others, or append it.
fn set_pair(pairs: &mut Vec<(String, String)>, key: &str, value: &str) {
    match pairs.iter().position(|(k, _)| k == key) {
        Some(first) => {
            pairs[first].1 = value.to_string();
            let mut index = 0;
            pairs.retain(|(k, _)| {
                let keep = k != key || index == first;
                index += 1;
                keep
            });
        }
        None => pairs.push((key.to_string(), value.to_string())),
    }
}

/// Serialize fragment pairs back into the URL.
///
/// A lone key such as `#section` parses as `section=` and would come back
/// with a dangling `=`; that trailing separator is stripped so plain keys
/// survive unchanged. Reserved characters are still form-encoded, so
/// `#/page` is written back as `#%2Fpage`.
fn write_fragment(url: &mut Url, pairs: &[(String, String)]) {
    let mut text = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter())
        .finish();
    if text.ends_with('=') {
        text.pop();
    }
    url.set_fragment((!text.is_empty()).then_some(text.as_str()));
}

fn strip_fragment_keys(location: &Url, keys: &[&str]) -> Url {
    let mut url = location.clone();
    let remaining: Vec<(String, String)> = fragment_pairs(location)
        .into_iter()
        .filter(|(k, _)| !keys.contains(&k.as_str()))
        .collect();
    write_fragment(&mut url, &remaining);
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(raw: u64) -> RequestId {
        RequestId::new(raw).unwrap()
    }

    #[test]
    fn test_invocation_layout() {
        let href = prepare_redirect_invocation(
            "https://b/",
            id(1234),
            &ReturnAddress::Url("https://a/".to_string()),
            "test",
            &[Value::from(42i64)],
            DeliveryMethod::RedirectGet,
        )
        .unwrap();

        assert_eq!(
            href,
            "https://b/?id=1234#command=test&returnURL=https%3A%2F%2Fa%2F&args=%5B42%5D"
        );
    }

    #[test]
    fn test_invocation_preserves_existing_fragment_and_query() {
        let href = prepare_redirect_invocation(
            "https://b/page?lang=en&id=5#tab=2",
            id(77),
            &ReturnAddress::PostMessage,
            "sign",
            &[],
            DeliveryMethod::InProcess,
        )
        .unwrap();

        assert_eq!(
            href,
            "https://b/page?lang=en&id=77#tab=2&command=sign&returnURL=%3CpostMessage%3E&args=%5B%5D"
        );
    }

    #[test]
    fn test_post_method_is_marked() {
        let href = prepare_redirect_invocation(
            "https://b/",
            id(3),
            &ReturnAddress::Url("https://a/".to_string()),
            "test",
            &[],
            DeliveryMethod::HttpPost,
        )
        .unwrap();
        assert!(href.ends_with("&responseMethod=post"));
    }

    #[test]
    fn test_reply_layout() {
        let href = prepare_redirect_reply("https://a/", id(1234), ResponseStatus::Ok, &Value::from(7i64)).unwrap();
        assert_eq!(href, "https://a/?id=1234#status=ok&result=7");
    }

    #[test]
    fn test_receive_command_requires_referrer() {
        let location = Url::parse("https://b/?id=9#command=test&returnURL=https%3A%2F%2Fa%2F").unwrap();
        assert!(receive_redirect_command(&location, None, false).is_none());
        assert!(receive_redirect_command(&location, Some(""), false).is_none());
        assert!(receive_redirect_command(&location, Some("https://a/start"), false).is_some());
    }

    #[test]
    fn test_receive_command_rejects_foreign_return_origin() {
        let location = Url::parse("https://b/?id=9#command=test&returnURL=https%3A%2F%2Fevil%2F").unwrap();
        assert!(receive_redirect_command(&location, Some("https://a/"), false).is_none());
    }

    #[test]
    fn test_receive_command_sentinel_needs_opener() {
        let location = Url::parse("https://b/?id=9#command=test&returnURL=%3CpostMessage%3E").unwrap();
        assert!(receive_redirect_command(&location, Some("https://a/"), false).is_none());

        let decoded = receive_redirect_command(&location, Some("https://a/"), true).unwrap();
        assert_eq!(decoded.message.return_address, ReturnAddress::PostMessage);
        assert_eq!(decoded.message.response_method, DeliveryMethod::InProcess);
    }

    #[test]
    fn test_receive_command_missing_fields() {
        let referrer = Some("https://a/");
        for href in [
            "https://b/#command=test&returnURL=https%3A%2F%2Fa%2F",
            "https://b/?id=9#returnURL=https%3A%2F%2Fa%2F",
            "https://b/?id=9#command=test",
            "https://b/?id=abc#command=test&returnURL=https%3A%2F%2Fa%2F",
        ] {
            let location = Url::parse(href).unwrap();
            assert!(receive_redirect_command(&location, referrer, false).is_none(), "{}", href);
        }
    }

    #[test]
    fn test_malformed_args_degrade_to_empty() {
        let referrer = Some("https://a/");
        for args in ["%5B1%2C", "%7B%7D", "42"] {
            let location = Url::parse(&format!(
                "https://b/?id=9#command=test&returnURL=https%3A%2F%2Fa%2F&args={}",
                args
            ))
            .unwrap();
            let decoded = receive_redirect_command(&location, referrer, false).unwrap();
            assert!(decoded.message.data.args.is_empty());
        }
    }

    #[test]
    fn test_cleaned_location_keeps_unrelated_fragment() {
        let location = Url::parse(
            "https://b/?id=9#section&command=test&returnURL=https%3A%2F%2Fa%2F&args=%5B%5D",
        )
        .unwrap();
        let decoded = receive_redirect_command(&location, Some("https://a/"), false).unwrap();

        assert_eq!(decoded.cleaned.as_str(), "https://b/?id=9#section");
        assert!(receive_redirect_command(&decoded.cleaned, Some("https://a/"), false).is_none());
    }

    #[test]
    fn test_hash_route_fragment_is_form_encoded() {
        let href = prepare_redirect_invocation(
            "https://b/#/page",
            id(1),
            &ReturnAddress::Url("https://a/".to_string()),
            "test",
            &[],
            DeliveryMethod::RedirectGet,
        )
        .unwrap();
        assert_eq!(
            href,
            "https://b/?id=1#%2Fpage=&command=test&returnURL=https%3A%2F%2Fa%2F&args=%5B%5D"
        );

        let decoded = receive_redirect_command(&Url::parse(&href).unwrap(), Some("https://a/"), false).unwrap();
        assert_eq!(decoded.cleaned.fragment(), Some("%2Fpage"));
    }

    #[test]
    fn test_cleaned_location_drops_empty_fragment() {
        let location = Url::parse("https://a/?id=9#status=ok&result=7").unwrap();
        let decoded = receive_redirect_response(&location, Some("https://b/")).unwrap();
        assert_eq!(decoded.cleaned.as_str(), "https://a/?id=9");
        assert_eq!(query_id(&decoded.cleaned), Some(id(9)));
    }

    #[test]
    fn test_receive_response() {
        let location = Url::parse("https://a/?id=9#status=error&result=%7B%22message%22%3A%22no%22%7D").unwrap();
        let decoded = receive_redirect_response(&location, Some("https://b/x")).unwrap();
        assert_eq!(decoded.message.origin, "https://b");
        assert_eq!(decoded.message.data.status, ResponseStatus::Error);
        assert_eq!(decoded.message.data.result.get("message"), Some(&Value::from("no")));
    }

    #[test]
    fn test_receive_response_malformed_result_is_null() {
        let location = Url::parse("https://a/?id=9#status=ok&result=%7Bbroken").unwrap();
        let decoded = receive_redirect_response(&location, Some("https://b/")).unwrap();
        assert!(decoded.message.data.result.is_null());
    }

    #[test]
    fn test_with_query_id_replaces() {
        let location = Url::parse("https://b/?id=3&x=1#frag").unwrap();
        assert_eq!(with_query_id(&location, id(8)).as_str(), "https://b/?id=8&x=1#frag");
    }
}
