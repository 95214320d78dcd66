/// Number of trailing characters left visible by [`mask_identifier`].
const VISIBLE_SUFFIX: usize = 4;

/// Mask all but the last four characters of an identifier for log output.
///
/// Identifiers of four characters or fewer are returned unchanged.
pub fn mask_identifier(id: &str) -> String {
    let len = id.chars().count();
    if len <= VISIBLE_SUFFIX {
        return id.to_string();
    }
    let hidden = len - VISIBLE_SUFFIX;
    id.chars()
        .enumerate()
        .map(|(i, c)| if i < hidden { '*' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masks_all_but_last_four() {
        assert_eq!(mask_identifier("15551234567"), "*******4567");
    }

    #[test]
    fn test_short_ids_untouched() {
        assert_eq!(mask_identifier("abcd"), "abcd");
        assert_eq!(mask_identifier(""), "");
    }

    #[test]
    fn test_multibyte_chars() {
        assert_eq!(mask_identifier("ééééé1234"), "*****1234");
    }
}
