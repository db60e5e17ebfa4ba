//! Topic to cache-key normalization
//!
//! Device topics follow the `<vendor>/<serial>/<field...>` layout, so the first
//! two segments carry no information once the value sits in the cache:
//!
//! ```text
//! go-eCharger/254959/nrg       ──► nrg
//! goodwe/254959/battery/soc    ──► battery_soc
//! status/online                ──► online
//! ```

/// Maps a wire topic onto the flat key used by the message cache.
///
/// Topics with more than two segments keep everything from the third segment
/// on, joined with `_`. Shorter topics collapse to their last segment.
pub fn cache_key(topic: &str) -> String {
    let segments: Vec<&str> = topic.split('/').collect();
    if segments.len() > 2 {
        segments[2..].join("_")
    } else {
        // split always yields at least one item
        segments.last().copied().unwrap_or_default().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_topics_drop_vendor_and_serial() {
        assert_eq!(cache_key("go-eCharger/254959/nrg"), "nrg");
        assert_eq!(cache_key("goodwe/254959/battery/soc"), "battery_soc");
        assert_eq!(cache_key("a/b/c/d"), "c_d");
    }

    #[test]
    fn short_topics_use_last_segment() {
        assert_eq!(cache_key("x/y"), "y");
        assert_eq!(cache_key("standalone"), "standalone");
    }

    #[test]
    fn degenerate_topics_do_not_panic() {
        assert_eq!(cache_key(""), "");
        assert_eq!(cache_key("/"), "");
        assert_eq!(cache_key("a/"), "");
        assert_eq!(cache_key("a/b/"), "");
        assert_eq!(cache_key("//x"), "x");
        assert_eq!(cache_key("a/b/c//d"), "c__d");
    }
}
