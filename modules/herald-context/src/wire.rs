//! Header encoding for context data that crosses a transport boundary.
//!
//! One header value carries many entries separated by `,`. Each entry is
//! `<region><marker><key>=<value>`:
//!
//! - region: `d` downstream, `u` upstream, `b` bidirectional
//! - marker: `.` for plain text, `~` when key and value are URL-safe base64
//!
//! Base64 is only used when the key or value contains `,` or `=`, so common
//! entries stay readable on the wire. Only text entries scoped
//! [`DataScope::AcrossTransports`] are encoded.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use tracing::debug;

use crate::context::{Context, Region};
use crate::data::{ContextValue, DataScope};
use crate::error::ContextDecodeError;

/// Header name transports use to carry encoded context.
pub const HERALD_CONTEXT_HEADER: &str = "herald-context";

const ENTRY_SEPARATOR: char = ',';
const KEY_VALUE_SEPARATOR: char = '=';
const PLAIN_MARKER: char = '.';
const ENCODED_MARKER: char = '~';

/// Encode what a publisher sends: downstream and bidirectional data.
pub fn encode_downstream(ctx: &Context) -> Option<String> {
    encode_regions(ctx, &[Region::Downstream, Region::Bidirectional])
}

/// Encode what a receiver returns: upstream and bidirectional data.
pub fn encode_upstream(ctx: &Context) -> Option<String> {
    encode_regions(ctx, &[Region::Upstream, Region::Bidirectional])
}

fn encode_regions(ctx: &Context, regions: &[Region]) -> Option<String> {
    let mut out = String::new();

    for &region in regions {
        for entry in ctx.region(region).entries() {
            if entry.scope != DataScope::AcrossTransports {
                continue;
            }
            let ContextValue::Text(value) = &entry.value else {
                continue;
            };

            if !out.is_empty() {
                out.push(ENTRY_SEPARATOR);
            }
            out.push(region.tag());
            if needs_encoding(&entry.key) || needs_encoding(value) {
                out.push(ENCODED_MARKER);
                out.push_str(&URL_SAFE_NO_PAD.encode(entry.key.as_bytes()));
                out.push(KEY_VALUE_SEPARATOR);
                out.push_str(&URL_SAFE_NO_PAD.encode(value.as_bytes()));
            } else {
                out.push(PLAIN_MARKER);
                out.push_str(&entry.key);
                out.push(KEY_VALUE_SEPARATOR);
                out.push_str(value);
            }
        }
    }

    (!out.is_empty()).then_some(out)
}

fn needs_encoding(s: &str) -> bool {
    s.contains(ENTRY_SEPARATOR) || s.contains(KEY_VALUE_SEPARATOR)
}

/// Decode header values into `ctx`.
///
/// Every value is parsed before anything is applied, so a malformed header
/// leaves `ctx` untouched. Later values overwrite earlier ones for the same
/// key. Decoded entries keep [`DataScope::AcrossTransports`].
pub fn decode<'a>(
    ctx: &Context,
    values: impl IntoIterator<Item = &'a str>,
) -> Result<(), ContextDecodeError> {
    let mut parsed = Vec::new();
    for value in values {
        if value.is_empty() {
            continue;
        }
        for raw in value.split(ENTRY_SEPARATOR) {
            parsed.push(parse_entry(raw)?);
        }
    }

    debug!(entries = parsed.len(), "decoded context header");
    for (region, key, value) in parsed {
        ctx.region(region)
            .set_scoped(key, value, DataScope::AcrossTransports);
    }
    Ok(())
}

fn parse_entry(raw: &str) -> Result<(Region, String, String), ContextDecodeError> {
    let mut chars = raw.chars();
    let (Some(tag), Some(marker)) = (chars.next(), chars.next()) else {
        return Err(ContextDecodeError::Truncated {
            entry: raw.to_string(),
        });
    };
    let region = Region::from_tag(tag).ok_or(ContextDecodeError::UnknownRegion(tag))?;

    let body = chars.as_str();
    let (key, value) =
        body.split_once(KEY_VALUE_SEPARATOR)
            .ok_or_else(|| ContextDecodeError::MissingSeparator {
                entry: raw.to_string(),
            })?;

    match marker {
        PLAIN_MARKER => Ok((region, key.to_string(), value.to_string())),
        ENCODED_MARKER => Ok((region, decode_part(key)?, decode_part(value)?)),
        other => Err(ContextDecodeError::UnknownMarker(other)),
    }
}

fn decode_part(part: &str) -> Result<String, ContextDecodeError> {
    let bytes = URL_SAFE_NO_PAD.decode(part)?;
    Ok(String::from_utf8(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn across(ctx: &Context, region: Region, key: &str, value: &str) {
        ctx.region(region)
            .set_scoped(key, value, DataScope::AcrossTransports);
    }

    #[test]
    fn plain_entries_stay_readable() {
        let ctx = Context::new();
        across(&ctx, Region::Downstream, "tenant", "acme");
        across(&ctx, Region::Bidirectional, "locale", "en");

        assert_eq!(
            encode_downstream(&ctx).as_deref(),
            Some("d.tenant=acme,b.locale=en")
        );
    }

    #[test]
    fn delimiters_survive_round_trip() {
        let sender = Context::new();
        across(&sender, Region::Downstream, "a,b", "x=y");
        across(&sender, Region::Downstream, "plain", "v,w");
        let header = encode_downstream(&sender).unwrap();
        assert!(header.contains('~'));

        let receiver = Context::new();
        decode(&receiver, [header.as_str()]).unwrap();
        assert_eq!(receiver.downstream().get("a,b").as_deref(), Some("x=y"));
        assert_eq!(receiver.downstream().get("plain").as_deref(), Some("v,w"));
    }

    #[test]
    fn empty_value_round_trips() {
        let sender = Context::new();
        across(&sender, Region::Upstream, "flag", "");
        let header = encode_upstream(&sender).unwrap();

        let receiver = Context::new();
        decode(&receiver, [header.as_str()]).unwrap();
        assert_eq!(receiver.upstream().get("flag").as_deref(), Some(""));
    }

    #[test]
    fn in_process_entries_are_not_encoded() {
        let ctx = Context::new();
        ctx.downstream().set("local", "only");
        ctx.downstream().set_object("obj", 5_u8);
        assert!(encode_downstream(&ctx).is_none());
    }

    #[test]
    fn upstream_encoding_excludes_downstream() {
        let ctx = Context::new();
        across(&ctx, Region::Downstream, "d", "1");
        across(&ctx, Region::Upstream, "u", "2");
        assert_eq!(encode_upstream(&ctx).as_deref(), Some("u.u=2"));
    }

    #[test]
    fn multiple_header_values_merge_later_wins() {
        let ctx = Context::new();
        decode(&ctx, ["d.k=1,d.a=x", "", "d.k=2"]).unwrap();
        assert_eq!(ctx.downstream().get("k").as_deref(), Some("2"));
        assert_eq!(ctx.downstream().get("a").as_deref(), Some("x"));
    }

    #[test]
    fn malformed_header_is_rejected_without_partial_apply() {
        let ctx = Context::new();
        let err = decode(&ctx, ["d.ok=1,x.bad=2"]).unwrap_err();
        assert!(matches!(err, ContextDecodeError::UnknownRegion('x')));
        assert!(ctx.downstream().is_empty());

        assert!(matches!(
            decode(&ctx, ["d"]),
            Err(ContextDecodeError::Truncated { .. })
        ));
        assert!(matches!(
            decode(&ctx, ["d.novalue"]),
            Err(ContextDecodeError::MissingSeparator { .. })
        ));
        assert!(matches!(
            decode(&ctx, ["d!k=v"]),
            Err(ContextDecodeError::UnknownMarker('!'))
        ));
        assert!(matches!(
            decode(&ctx, ["d~***=AA"]),
            Err(ContextDecodeError::Base64(_))
        ));
    }
}
