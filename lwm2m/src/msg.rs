use std_alloc::string::String;
use std_alloc::vec::Vec;
use tinyvec::ArrayVec;

/// Indicates if a message is Confirmable, Non-confirmable, an
/// Acknowledgement or a Reset.
///
/// The exchange layer owns ack/reset behavior; the core only ever
/// originates `Con` and `Non` messages.
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Requires an acknowledgement
  Con,
  /// Fire and forget
  Non,
  /// Acknowledges a Con message
  Ack,
  /// The peer received a message it lacks context to process
  Reset,
}

/// Message code: `class.detail`.
///
/// Class 0 codes are request methods, classes 2/4/5 are response
/// statuses.
///
/// ```
/// use lwm2m::msg::{Code, CodeKind};
///
/// assert_eq!(Code::GET.kind(), CodeKind::Request);
/// assert_eq!(Code::CONTENT.kind(), CodeKind::Response);
/// assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct Code {
  /// Request (0), success (2), client error (4) or server error (5)
  pub class: u8,
  /// Granular status within the class
  pub detail: u8,
}

/// Whether a code is for a request, response, or empty message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CodeKind {
  /// A request code (0.xx)
  Request,
  /// A response code ([2-5].xx)
  Response,
  /// EMPTY (0.00)
  Empty,
}

impl Code {
  /// Create a new Code
  pub const fn new(class: u8, detail: u8) -> Self {
    Self { class, detail }
  }

  /// Method GET (0.01)
  pub const GET: Code = Code::new(0, 1);
  /// Method POST (0.02)
  pub const POST: Code = Code::new(0, 2);
  /// Method PUT (0.03)
  pub const PUT: Code = Code::new(0, 3);
  /// Method DELETE (0.04)
  pub const DELETE: Code = Code::new(0, 4);

  /// 2.01 Created
  pub const CREATED: Code = Code::new(2, 1);
  /// 2.02 Deleted
  pub const DELETED: Code = Code::new(2, 2);
  /// 2.04 Changed
  pub const CHANGED: Code = Code::new(2, 4);
  /// 2.05 Content
  pub const CONTENT: Code = Code::new(2, 5);

  /// 4.00 Bad Request
  pub const BAD_REQUEST: Code = Code::new(4, 0);
  /// 4.01 Unauthorized
  pub const UNAUTHORIZED: Code = Code::new(4, 1);
  /// 4.04 Not Found
  pub const NOT_FOUND: Code = Code::new(4, 4);
  /// 4.05 Method Not Allowed
  pub const METHOD_NOT_ALLOWED: Code = Code::new(4, 5);
  /// 4.15 Unsupported Content-Format
  pub const UNSUPPORTED_CONTENT_FORMAT: Code = Code::new(4, 15);

  /// 5.00 Internal Server Error
  pub const INTERNAL_SERVER_ERROR: Code = Code::new(5, 0);
  /// 5.01 Not Implemented
  pub const NOT_IMPLEMENTED: Code = Code::new(5, 1);
  /// 5.03 Service Unavailable
  pub const SERVICE_UNAVAILABLE: Code = Code::new(5, 3);

  /// Get whether this code is for a request, response, or empty message
  pub fn kind(&self) -> CodeKind {
    match (self.class, self.detail) {
      | (0, 0) => CodeKind::Empty,
      | (0, _) => CodeKind::Request,
      | _ => CodeKind::Response,
    }
  }

  /// Whether this is a 2.xx code
  pub fn is_success(&self) -> bool {
    self.class == 2
  }

  /// Get the human string representation of a message code
  ///
  /// ```
  /// use lwm2m::msg::Code;
  ///
  /// assert_eq!(String::from_iter(Code::new(2, 5).to_human()), "2.05");
  /// ```
  pub fn to_human(&self) -> [char; 4] {
    let to_char = |d: u8| char::from_digit(d.into(), 10).unwrap_or('?');
    [to_char(self.class),
     '.',
     to_char(self.detail / 10),
     to_char(self.detail % 10)]
  }
}

/// Message token: the correlation id between a request and its
/// response(s).
///
/// `Token(Default::default())` is the empty token.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub ArrayVec<[u8; 8]>);

impl Token {
  /// A full-width token from 8 raw bytes
  pub fn from_bytes(bytes: [u8; 8]) -> Self {
    Self(bytes.into())
  }
}

/// LWM2M content formats & their numeric Content-Format identifiers.
///
/// The OMA-registered values 1541-1544 are canonical on output; the
/// older pre-registration values (0 text, 42 opaque, 11542 TLV, 11543
/// JSON) are still seen in deployed stacks and accepted on input.
///
/// ```
/// use lwm2m::msg::ContentFormat;
///
/// assert_eq!(ContentFormat::Tlv.number(), 1542);
/// assert_eq!(ContentFormat::from_number(11542), Some(ContentFormat::Tlv));
/// assert_eq!(ContentFormat::from_number(50), None);
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum ContentFormat {
  /// LWM2M-flavored text/plain; numeric resources travel as decimal
  /// text
  Text,
  /// The LWM2M TLV binary format
  Tlv,
  /// Reserved; negotiating it always fails with 4.15
  Json,
  /// Raw bytes
  Opaque,
  /// CoRE Link Format (RFC 6690), carried by registration payloads
  LinkFormat,
}

impl ContentFormat {
  /// The numeric identifier sent on the wire
  pub fn number(&self) -> u16 {
    match self {
      | Self::Text => 1541,
      | Self::Tlv => 1542,
      | Self::Json => 1543,
      | Self::Opaque => 1544,
      | Self::LinkFormat => 40,
    }
  }

  /// Recognize a numeric identifier, including the pre-registration
  /// aliases
  pub fn from_number(n: u16) -> Option<Self> {
    match n {
      | 0 | 1541 => Some(Self::Text),
      | 1542 | 11542 => Some(Self::Tlv),
      | 1543 | 11543 => Some(Self::Json),
      | 42 | 1544 => Some(Self::Opaque),
      | 40 => Some(Self::LinkFormat),
      | _ => None,
    }
  }
}

/// The structured unit this crate exchanges with the CoAP transport.
///
/// This is deliberately *not* the CoAP byte layout - serialization,
/// message ids, retransmission and block-wise reassembly belong to the
/// transport. The fields here are the parts of a message the LWM2M
/// core actually consumes:
///
/// - `path` is the joined Uri-Path on requests and, when non-empty,
///   the Location-Path on responses.
/// - `queries` are the Uri-Query strings (`"ep=name"`).
/// - `observe` is the value of the Observe option, when present.
/// - `accept` is the Accept option: the format the requester wants
///   the response in.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Msg {
  /// see [`Type`]
  pub ty: Type,
  /// see [`Code`]
  pub code: Code,
  /// see [`Token`]
  pub token: Token,
  /// Uri-Path (requests) / Location-Path (responses)
  pub path: String,
  /// Uri-Query strings
  pub queries: Vec<String>,
  /// Content-Format of the payload, when one was supplied
  pub content_format: Option<ContentFormat>,
  /// Accept option: the content format asked of the response
  pub accept: Option<ContentFormat>,
  /// Observe option (RFC 7641)
  pub observe: Option<u32>,
  /// The payload, handed over whole
  pub payload: Vec<u8>,
}

impl Msg {
  /// A confirmable request
  pub fn request(code: Code, path: impl Into<String>, token: Token) -> Self {
    Self { ty: Type::Con,
           code,
           token,
           path: path.into(),
           queries: Vec::new(),
           content_format: None,
           accept: None,
           observe: None,
           payload: Vec::new() }
  }

  /// A response reusing the request's token
  pub fn response(code: Code, token: Token) -> Self {
    Self { ty: Type::Con,
           code,
           token,
           path: String::new(),
           queries: Vec::new(),
           content_format: None,
           accept: None,
           observe: None,
           payload: Vec::new() }
  }

  /// Find the value of query parameter `key`, e.g. `query("ep")` on a
  /// register request
  pub fn query(&self, key: &str) -> Option<&str> {
    self.queries
        .iter()
        .find_map(|q| q.strip_prefix(key).and_then(|rest| rest.strip_prefix('=')))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn code_kinds() {
    assert_eq!(Code::GET.kind(), CodeKind::Request);
    assert_eq!(Code::new(0, 0).kind(), CodeKind::Empty);
    assert_eq!(Code::CREATED.kind(), CodeKind::Response);
    assert_eq!(Code::SERVICE_UNAVAILABLE.kind(), CodeKind::Response);
  }

  #[test]
  fn content_format_aliases() {
    for (n, cf) in [(0, ContentFormat::Text),
                    (1541, ContentFormat::Text),
                    (42, ContentFormat::Opaque),
                    (1544, ContentFormat::Opaque),
                    (1542, ContentFormat::Tlv),
                    (11542, ContentFormat::Tlv),
                    (1543, ContentFormat::Json),
                    (11543, ContentFormat::Json)]
    {
      assert_eq!(ContentFormat::from_number(n), Some(cf));
    }

    assert_eq!(ContentFormat::from_number(60), None);
  }

  #[test]
  fn queries() {
    let mut msg = Msg::request(Code::POST, "rd", Token::default());
    msg.queries = vec!["ep=dev".into(), "lt=60".into(), "b=U".into()];

    assert_eq!(msg.query("ep"), Some("dev"));
    assert_eq!(msg.query("lt"), Some("60"));
    assert_eq!(msg.query("lwm2m"), None);
  }
}
