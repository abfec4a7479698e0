//! `auth-param` header grammar shared by `authorization` and
//! `capability-invocation`:
//!
//! ```text
//! header = scheme 1*SP param *( OWS "," OWS param )
//! param  = token "=" ( token / quoted-string )
//! ```

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, take_while1},
    character::complete::{anychar, char, space0, space1},
    combinator::{all_consuming, map, opt},
    multi::separated_list1,
    sequence::{delimited, separated_pair, terminated, tuple},
};

/// A header value that does not parse, or lacks what it must carry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HeaderParseError {
    /// The value does not follow the auth-param grammar.
    #[error("malformed {header} header: {reason}")]
    Syntax {
        /// Header name.
        header: &'static str,
        /// Parser error.
        reason: String,
    },

    /// The scheme is not the one expected.
    #[error("unsupported {header} scheme {scheme}")]
    UnsupportedScheme {
        /// Header name.
        header: &'static str,
        /// The scheme found.
        scheme: String,
    },

    /// A required parameter is absent.
    #[error("{header} header is missing the {param} parameter")]
    MissingParameter {
        /// Header name.
        header: &'static str,
        /// Parameter name.
        param: &'static str,
    },

    /// A parameter is present but invalid.
    #[error("invalid {param} in {header} header: {reason}")]
    InvalidParameter {
        /// Header name.
        header: &'static str,
        /// Parameter name.
        param: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// A parsed auth-param header: its scheme and parameters in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthParams {
    /// Authentication scheme, e.g. `Signature` or `zcap`.
    pub scheme: String,
    /// Parameters with quoting and escapes removed.
    pub params: Vec<(String, String)>,
}

impl AuthParams {
    /// First value of `name`, matched case-sensitively.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Parse `input` as the value of the `header` header.
    ///
    /// # Errors
    ///
    /// [`HeaderParseError::Syntax`] when `input` is not an auth-param list.
    pub fn parse(header: &'static str, input: &str) -> Result<Self, HeaderParseError> {
        all_consuming(terminated(auth_params, space0))(input.trim_start())
            .map(|(_, parsed)| parsed)
            .map_err(|e| HeaderParseError::Syntax {
                header,
                reason: e.to_string(),
            })
    }

    /// Render as a header value, quoting every parameter value.
    pub fn to_header_value(&self) -> String {
        let params = self
            .params
            .iter()
            .map(|(key, value)| format!("{key}=\"{}\"", escape(value)))
            .collect::<Vec<_>>()
            .join(",");
        format!("{} {params}", self.scheme)
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn token(input: &str) -> IResult<&str, &str> {
    take_while1(is_token_char)(input)
}

fn quoted_string(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            opt(escaped_transform(is_not("\\\""), '\\', anychar)),
            char('"'),
        ),
        Option::unwrap_or_default,
    )(input)
}

fn param(input: &str) -> IResult<&str, (String, String)> {
    map(
        separated_pair(
            token,
            char('='),
            alt((quoted_string, map(token, str::to_string))),
        ),
        |(key, value)| (key.to_string(), value),
    )(input)
}

fn auth_params(input: &str) -> IResult<&str, AuthParams> {
    map(
        separated_pair(
            token,
            space1,
            separated_list1(tuple((space0, char(','), space0)), param),
        ),
        |(scheme, params)| AuthParams {
            scheme: scheme.to_string(),
            params,
        },
    )(input)
}
