//! Per-message pipeline: identity, header step, and body step.
//!
//! A record moves from [`MessageParser::identify`] through
//! [`MessageParser::parse_header`] to [`MessageParser::parse_body`]. Either
//! step may reject the message; the body step is skipped entirely when the
//! cache already holds the record.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

use super::body::BodyExtractor;
use super::eml::split_header_body;
use super::header::{HeaderFields, MessageIdMatcher};
use super::language::LanguageGuesser;
use super::mime::extract_text_body;
use super::segment::Segmenter;
use crate::cache::checksum::adler32;
use crate::config::ScanOptions;
use crate::error::Rejection;
use crate::model::message::{Message, MessageAttributes};
use crate::store::mailbox::RawMessage;

/// A message whose header step succeeded.
#[derive(Debug, Clone)]
pub struct HeaderParsed {
    pub message: Message,
    /// Charsets named by encoded-words in `From:` / `To:`.
    encodings_used: BTreeSet<String>,
}

pub struct MessageParser<'a> {
    options: &'a ScanOptions,
    guesser: &'a dyn LanguageGuesser,
    extractor: BodyExtractor,
    message_id: MessageIdMatcher,
}

impl<'a> MessageParser<'a> {
    pub fn new(options: &'a ScanOptions, guesser: &'a dyn LanguageGuesser) -> Self {
        let segmenter = Segmenter::new(options.quote.clone(), options.smileys.clone());
        Self {
            options,
            guesser,
            extractor: BodyExtractor::new(segmenter),
            message_id: MessageIdMatcher::default(),
        }
    }

    /// Identity of a raw record: Message-ID, position, and checksum.
    pub fn identify(&self, raw: &RawMessage) -> Message {
        let (headers, _) = split_header_body(&raw.bytes);
        Message {
            msgid: self.message_id.find(headers),
            position: raw.position(),
            checksum: adler32(&raw.bytes),
            age_days: 0,
            attrs: MessageAttributes {
                mailbox_path: raw.mailbox_path.clone(),
                ..Default::default()
            },
        }
    }

    /// Decode sender, recipients, and date.
    ///
    /// A missing or unparseable `Date:` counts as sent at `now`.
    pub fn parse_header(
        &self,
        mut message: Message,
        raw: &RawMessage,
        now: DateTime<Utc>,
    ) -> Result<HeaderParsed, Rejection> {
        let (headers, _) = split_header_body(&raw.bytes);
        let fields = HeaderFields::parse(headers)?;

        message.attrs.from_header = fields.from_header;
        message.attrs.from_address = fields.from.normalized();
        message.attrs.from_display_name = fields.from.display_name;
        message
            .attrs
            .set_recipients(fields.to.iter().map(|a| a.normalized()));
        let timestamp = fields.date.unwrap_or(now).timestamp();
        message.set_time(timestamp, now);

        Ok(HeaderParsed {
            message,
            encodings_used: fields.encodings_used,
        })
    }

    /// Learn charset, signature, greeting, goodbye, and language.
    ///
    /// On rejection the message is returned with whatever was learned up to
    /// that point, so the outcome can still be cached.
    pub fn parse_body(
        &self,
        parsed: HeaderParsed,
        raw: &RawMessage,
    ) -> (Message, Option<Rejection>) {
        let HeaderParsed {
            mut message,
            encodings_used,
        } = parsed;

        let body = match extract_text_body(
            &raw.bytes,
            &self.options.assumed_charsets,
            &encodings_used,
        ) {
            Ok(body) => body,
            Err(rejection) => return (message, Some(rejection)),
        };
        message.attrs.charset = body.charset;

        let (text, signature) = self.extractor.split_signature(&body.text);
        message.attrs.signature = signature;

        if !self.options.personalize_mailinglists
            && message
                .attrs
                .to_addresses
                .iter()
                .any(|a| self.options.addresses.is_mailing_list(a))
        {
            return (message, Some(Rejection::MailingList));
        }

        let salutation = self.extractor.salutation(&text, self.guesser);
        message.attrs.greeting = salutation.greeting;
        message.attrs.goodbye = salutation.goodbye;
        message.attrs.language = salutation.language;

        (message, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::parser::language::NoGuesser;
    use chrono::TimeZone;

    fn raw(bytes: &[u8]) -> RawMessage {
        RawMessage {
            mailbox_path: "/mail/sent".to_string(),
            key: "3".to_string(),
            bytes: bytes.to_vec(),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 11, 12, 0, 0).unwrap()
    }

    const MAIL: &[u8] = b"Message-ID: <m1@x>\n\
From: Anne Example <Anne@Example.org>\n\
To: Bob <bob@example.org>, carol@example.org\n\
Date: Fri, 08 Mar 2024 12:00:00 +0000\n\
\n\
Hi Bob,\n\nSee attached.\n\nRegards,\nAnne\n\n-- \nAnne Example\n";

    #[test]
    fn test_full_pipeline() {
        let options = Config::default().resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);
        let record = raw(MAIL);

        let message = parser.identify(&record);
        assert_eq!(message.msgid.as_deref(), Some("<m1@x>"));
        assert_eq!(message.position, "/mail/sent#3");
        assert_eq!(message.checksum, adler32(MAIL));

        let parsed = parser.parse_header(message, &record, now()).unwrap();
        let attrs = &parsed.message.attrs;
        assert_eq!(attrs.from_address, "anne@example.org");
        assert_eq!(attrs.from_display_name, "Anne Example");
        assert_eq!(attrs.to_addresses_key, "bob@example.org carol@example.org");
        assert_eq!(parsed.message.age_days, 3);

        let (message, rejection) = parser.parse_body(parsed, &record);
        assert_eq!(rejection, None);
        assert_eq!(message.attrs.charset, "us-ascii");
        assert_eq!(message.attrs.signature, "Anne Example");
        assert_eq!(message.attrs.greeting, "Hi Bob,");
        assert_eq!(message.attrs.goodbye, "Regards,\nAnne");
    }

    #[test]
    fn test_ascii_body_records_header_charset() {
        let options = Config::default().resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);
        let record = raw(b"Message-ID: <m2@x>\n\
From: =?ISO-8859-1?Q?J=F6rg?= <joerg@example.org>\n\
To: =?utf-8?q?Zo=C3=AB?= <zoe@example.org>\n\
Content-Type: text/plain; charset=US-ASCII\n\
\n\
Hi Zoe,\n\nPlain ASCII only.\n");

        let parsed = parser
            .parse_header(parser.identify(&record), &record, now())
            .unwrap();
        assert_eq!(parsed.message.attrs.from_display_name, "Jörg");
        let (message, rejection) = parser.parse_body(parsed, &record);
        assert_eq!(rejection, None);
        // Sorted header charsets, first one that is not us-ascii.
        assert_eq!(message.attrs.charset, "iso-8859-1");

        let record = raw(b"From: a@x\nTo: b@x\nContent-Type: text/plain; charset=us-ascii\n\nHello\n");
        let parsed = parser
            .parse_header(parser.identify(&record), &record, now())
            .unwrap();
        assert_eq!(parser.parse_body(parsed, &record).0.attrs.charset, "us-ascii");
    }

    #[test]
    fn test_missing_date_uses_now() {
        let options = Config::default().resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);
        let record = raw(b"From: a@x\nTo: b@x\n\nHello\n");
        let parsed = parser
            .parse_header(parser.identify(&record), &record, now())
            .unwrap();
        assert_eq!(parsed.message.attrs.timestamp, now().timestamp());
        assert_eq!(parsed.message.age_days, 0);
        assert_eq!(parsed.message.msgid, None);
    }

    #[test]
    fn test_header_rejections() {
        let options = Config::default().resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);

        let record = raw(b"From: a@x\n\nHello\n");
        let result = parser.parse_header(parser.identify(&record), &record, now());
        assert_eq!(result.unwrap_err(), Rejection::NoRecipient);

        let record = raw(b"To: b@x\n\nHello\n");
        let result = parser.parse_header(parser.identify(&record), &record, now());
        assert_eq!(result.unwrap_err(), Rejection::NoSender);
    }

    #[test]
    fn test_mailing_list_rejected_after_signature() {
        let mut config = Config::default();
        config.addresses.lists = vec![r"dev@lists\.org".to_string()];
        let options = config.resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);
        let record = raw(b"From: a@x\nTo: dev@lists.org\n\nHi,\n\nText\n\n-- \nsig\n");

        let parsed = parser
            .parse_header(parser.identify(&record), &record, now())
            .unwrap();
        let (message, rejection) = parser.parse_body(parsed, &record);
        assert_eq!(rejection, Some(Rejection::MailingList));
        assert_eq!(message.attrs.signature, "sig");
        assert_eq!(message.attrs.greeting, "");
    }

    #[test]
    fn test_html_only_is_rejected() {
        let options = Config::default().resolve().unwrap();
        let parser = MessageParser::new(&options, &NoGuesser);
        let record = raw(b"From: a@x\nTo: b@x\nContent-Type: text/html\n\n<p>Hi</p>\n");
        let parsed = parser
            .parse_header(parser.identify(&record), &record, now())
            .unwrap();
        let (_, rejection) = parser.parse_body(parsed, &record);
        assert!(matches!(
            rejection,
            Some(Rejection::UnsupportedContentType(ct)) if ct == "text/html"
        ));
    }
}
