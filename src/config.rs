// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Environment overrides.

Configuration lives in plain structs with `Default` impls ([crate::loader::LoaderConfig],
[crate::frame::FrameConfig]).  Their `from_env` constructors start from the defaults and apply any
of these variables that are set:

| variable                         | meaning                                        |
|----------------------------------|------------------------------------------------|
| `FRAMESTREAM_PACING_MS`          | sleep between loader uploads, in milliseconds  |
| `FRAMESTREAM_TRAMPOLINE_EXTENT`  | trampoline capacity, e.g. `512x512`            |
| `FRAMESTREAM_ALLOW_TEARING`      | `1` to present with tearing allowed            |
| `FRAMESTREAM_SYNC_INTERVAL`      | present sync interval                          |

Malformed values are ignored with a warning.
*/

pub const PACING_MS: &str = "FRAMESTREAM_PACING_MS";
pub const TRAMPOLINE_EXTENT: &str = "FRAMESTREAM_TRAMPOLINE_EXTENT";
pub const ALLOW_TEARING: &str = "FRAMESTREAM_ALLOW_TEARING";
pub const SYNC_INTERVAL: &str = "FRAMESTREAM_SYNC_INTERVAL";

pub(crate) fn flag(name: &str) -> Option<bool> {
    std::env::var(name).ok().map(|e| e == "1")
}

pub(crate) fn number(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            logwise::warn_sync!(
                "ignoring {name}={value}: not a number",
                name = name.to_string(),
                value = value.clone()
            );
            None
        }
    }
}

pub(crate) fn extent(name: &str) -> Option<(u32, u32)> {
    let value = std::env::var(name).ok()?;
    let parsed = parse_extent(&value);
    if parsed.is_none() {
        logwise::warn_sync!(
            "ignoring {name}={value}: expected WIDTHxHEIGHT",
            name = name.to_string(),
            value = value.clone()
        );
    }
    parsed
}

fn parse_extent(value: &str) -> Option<(u32, u32)> {
    let (w, h) = value.trim().split_once(['x', 'X'])?;
    let w: u32 = w.trim().parse().ok()?;
    let h: u32 = h.trim().parse().ok()?;
    if w == 0 || h == 0 {
        return None;
    }
    Some((w, h))
}
