//! Container image tag handling.
//!
//! A deployment's images carry commit hashes as tags; the tag after the last
//! `:` is the candidate. Images whose tag is not a 7-40 hex string are not
//! commit-pinned and are skipped.

use github::is_valid_commit_hash;

/// Tag after the last `:`, or `None` when the reference has no tag.
#[must_use]
pub fn extract_tag(image: &str) -> Option<&str> {
    image.rsplit_once(':').map(|(_, tag)| tag)
}

/// Image reference without its tag.
#[must_use]
pub fn base_image(image: &str) -> &str {
    image.rsplit_once(':').map_or(image, |(base, _)| base)
}

/// Images whose tag parses as a commit hash.
#[must_use]
pub fn extract_valid_images(images: &[String]) -> Vec<String> {
    images
        .iter()
        .filter(|image| extract_tag(image).is_some_and(is_valid_commit_hash))
        .cloned()
        .collect()
}

/// Images in `current` that did not appear in `previous` with the same base
/// and tag. A re-tagged base counts as changed; an identical reference does
/// not.
#[must_use]
pub fn find_changed_images(current: &[String], previous: &[String]) -> Vec<String> {
    current
        .iter()
        .filter(|image| {
            let base = base_image(image);
            let tag = extract_tag(image);
            !previous
                .iter()
                .any(|prev| base_image(prev) == base && extract_tag(prev) == tag)
        })
        .cloned()
        .collect()
}

/// Tag of the previous image sharing `image`'s base, if one exists.
#[must_use]
pub fn previous_tag_for(image: &str, previous: &[String]) -> Option<String> {
    let base = base_image(image);
    previous
        .iter()
        .find(|prev| base_image(prev) == base)
        .and_then(|prev| extract_tag(prev))
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_tag_takes_text_after_last_colon() {
        assert_eq!(
            extract_tag("quay.io/org/build-service:abc1234"),
            Some("abc1234")
        );
        // Registry ports add an extra colon; the tag is still the last part.
        assert_eq!(
            extract_tag("registry.local:5000/org/app:abc1234"),
            Some("abc1234")
        );
        assert_eq!(extract_tag("quay.io/org/build-service"), None);
    }

    #[test]
    fn base_plus_tag_reassembles_image() {
        let image = "quay.io/org/build-service:abc1234";
        let tag = extract_tag(image).unwrap();
        assert_eq!(format!("{}:{}", base_image(image), tag), image);
    }

    #[test]
    fn extract_valid_images_filters_on_hash_tags() {
        let images = vec![
            "quay.io/org/a:abc1234".to_string(),              // valid, 7 hex
            "quay.io/org/b:abcdef".to_string(),               // 6 chars, too short
            "quay.io/org/c:latest".to_string(),               // not hex
            "quay.io/org/d".to_string(),                      // no tag
            format!("quay.io/org/e:{}", "f".repeat(40)),      // 40 hex
            format!("quay.io/org/f:{}", "f".repeat(41)),      // 41, too long
        ];
        assert_eq!(
            extract_valid_images(&images),
            vec![
                "quay.io/org/a:abc1234".to_string(),
                format!("quay.io/org/e:{}", "f".repeat(40)),
            ]
        );
    }

    #[test]
    fn changed_images_keeps_retagged_and_new_bases() {
        let current = vec![
            "quay.io/org/a:1111111".to_string(),
            "quay.io/org/b:2222222".to_string(),
            "quay.io/org/c:3333333".to_string(),
        ];
        let previous = vec![
            "quay.io/org/a:0000000".to_string(), // re-tagged
            "quay.io/org/b:2222222".to_string(), // identical
        ];

        assert_eq!(
            find_changed_images(&current, &previous),
            vec![
                "quay.io/org/a:1111111".to_string(),
                "quay.io/org/c:3333333".to_string(),
            ]
        );
    }

    #[test]
    fn previous_tag_resolution() {
        let previous = vec![
            "quay.io/org/a:0000000".to_string(),
            "quay.io/org/b:1111111".to_string(),
        ];
        assert_eq!(
            previous_tag_for("quay.io/org/a:2222222", &previous),
            Some("0000000".to_string())
        );
        assert_eq!(previous_tag_for("quay.io/org/c:2222222", &previous), None);
    }
}
