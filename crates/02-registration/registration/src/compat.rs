//! Normalization of the legacy combined topic type field.
//!
//! Older peers only fill `legacy_type` (`"encoding:name"`), newer ones only
//! fill `type_encoding`/`type_name`. Applied samples always carry both forms.

use std::borrow::Cow;

use crate::sample::{RegistrationSample, TopicInfo};

/// Returns `sample` with both type representations filled in.
///
/// The input is never modified; it is only cloned when a field is missing.
pub fn normalize(sample: &RegistrationSample) -> Cow<'_, RegistrationSample> {
    let topic = &sample.topic;
    let has_split = !topic.type_encoding.is_empty() || !topic.type_name.is_empty();
    let has_legacy = !topic.legacy_type.is_empty();
    if has_split == has_legacy {
        return Cow::Borrowed(sample);
    }

    let mut normalized = sample.clone();
    if has_legacy {
        split_legacy(&mut normalized.topic);
    } else {
        normalized.topic.legacy_type = join_legacy(&topic.type_encoding, &topic.type_name);
    }
    Cow::Owned(normalized)
}

fn split_legacy(topic: &mut TopicInfo) {
    match topic.legacy_type.split_once(':') {
        Some((encoding, name)) => {
            topic.type_encoding = encoding.to_string();
            topic.type_name = name.to_string();
        }
        None => topic.type_name = topic.legacy_type.clone(),
    }
}

fn join_legacy(encoding: &str, name: &str) -> String {
    if encoding.is_empty() {
        name.to_string()
    } else {
        format!("{encoding}:{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::Command;

    fn with_topic(topic: TopicInfo) -> RegistrationSample {
        RegistrationSample::for_topic(Command::RegisterPublisher, topic)
    }

    #[test]
    fn legacy_field_is_split() {
        let sample = with_topic(TopicInfo {
            legacy_type: "proto:pb.People.Person".into(),
            ..TopicInfo::default()
        });
        let normalized = normalize(&sample);
        assert_eq!(normalized.topic.type_encoding, "proto");
        assert_eq!(normalized.topic.type_name, "pb.People.Person");
        assert!(sample.topic.type_name.is_empty(), "input must stay untouched");
    }

    #[test]
    fn legacy_field_without_encoding_becomes_the_name() {
        let sample = with_topic(TopicInfo {
            legacy_type: "RawBytes".into(),
            ..TopicInfo::default()
        });
        let normalized = normalize(&sample);
        assert_eq!(normalized.topic.type_encoding, "");
        assert_eq!(normalized.topic.type_name, "RawBytes");
    }

    #[test]
    fn split_fields_fill_the_legacy_field() {
        let sample = with_topic(TopicInfo {
            type_encoding: "base".into(),
            type_name: "std::string".into(),
            ..TopicInfo::default()
        });
        assert_eq!(normalize(&sample).topic.legacy_type, "base:std::string");
    }

    #[test]
    fn complete_samples_are_borrowed() {
        let sample = with_topic(TopicInfo {
            type_encoding: "proto".into(),
            type_name: "A".into(),
            legacy_type: "proto:A".into(),
            ..TopicInfo::default()
        });
        assert!(matches!(normalize(&sample), Cow::Borrowed(_)));
        let empty = RegistrationSample::new(Command::RegisterProcess);
        assert!(matches!(normalize(&empty), Cow::Borrowed(_)));
    }
}
