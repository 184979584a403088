use bleed_cache::{CacheRecord, OutcomeCode, StoreError};
use bytes::Bytes;
use redis_protocol::resp2::types::BytesFrame;

const FIELD_HOST: &str = "hostname";
const FIELD_MTIME: &str = "mtime";
const FIELD_STATUS: &str = "status";
const FIELD_DATA: &str = "data";
const FIELD_ERROR: &str = "error";

/// Build a command as an array of bulk strings.
pub fn command(args: &[&[u8]]) -> BytesFrame {
    BytesFrame::Array(
        args.iter()
            .map(|a| BytesFrame::BulkString(Bytes::copy_from_slice(a)))
            .collect(),
    )
}

pub fn ping() -> BytesFrame {
    command(&[b"PING"])
}

pub fn hgetall(key: &str) -> BytesFrame {
    command(&[b"HGETALL", key.as_bytes()])
}

/// HSET with every record field, so a write always replaces the whole record.
pub fn hset_record(key: &str, record: &CacheRecord) -> BytesFrame {
    let mtime = record.last_update.to_string();
    let status = record.status.as_i64().to_string();
    command(&[
        b"HSET",
        key.as_bytes(),
        FIELD_HOST.as_bytes(),
        record.host.as_bytes(),
        FIELD_MTIME.as_bytes(),
        mtime.as_bytes(),
        FIELD_STATUS.as_bytes(),
        status.as_bytes(),
        FIELD_DATA.as_bytes(),
        record.data.as_bytes(),
        FIELD_ERROR.as_bytes(),
        record.error.as_bytes(),
    ])
}

/// Turn an error reply into a backend error; pass anything else through.
pub fn check_reply(frame: BytesFrame) -> Result<BytesFrame, StoreError> {
    match frame {
        BytesFrame::Error(msg) => Err(StoreError::Backend(msg.to_string())),
        other => Ok(other),
    }
}

/// Decode an HGETALL reply. An empty array (or nil) means the key is absent.
pub fn decode_record(frame: BytesFrame) -> Result<Option<CacheRecord>, StoreError> {
    let items = match check_reply(frame)? {
        BytesFrame::Array(items) => items,
        BytesFrame::Null => return Ok(None),
        other => {
            return Err(StoreError::Decode(format!(
                "expected array reply, got {other:?}"
            )))
        }
    };

    if items.is_empty() {
        return Ok(None);
    }
    if items.len() % 2 != 0 {
        return Err(StoreError::Decode("odd number of hash fields".into()));
    }

    let mut host = None;
    let mut mtime = None;
    let mut status = None;
    let mut data = String::new();
    let mut error = String::new();

    for pair in items.chunks(2) {
        let field = bulk_to_string(&pair[0]);
        let value = bulk_to_string(&pair[1]);
        match field.as_str() {
            FIELD_HOST => host = Some(value),
            FIELD_MTIME => mtime = Some(parse_number(FIELD_MTIME, &value)?),
            FIELD_STATUS => status = Some(parse_number(FIELD_STATUS, &value)?),
            FIELD_DATA => data = value,
            FIELD_ERROR => error = value,
            _ => {}
        }
    }

    let last_update = mtime.ok_or_else(|| StoreError::Decode("missing mtime".into()))?;
    let status = status.ok_or_else(|| StoreError::Decode("missing status".into()))?;

    Ok(Some(CacheRecord {
        host: host.unwrap_or_default(),
        last_update,
        status: OutcomeCode::from_i64(status)?,
        data,
        error,
    }))
}

fn parse_number(field: &str, value: &str) -> Result<i64, StoreError> {
    value
        .trim()
        .parse::<i64>()
        .map_err(|e| StoreError::Decode(format!("bad {field} {value:?}: {e}")))
}

fn bulk_to_string(frame: &BytesFrame) -> String {
    match frame {
        BytesFrame::BulkString(b) | BytesFrame::SimpleString(b) => {
            String::from_utf8_lossy(b).into_owned()
        }
        BytesFrame::Integer(i) => i.to_string(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> BytesFrame {
        BytesFrame::BulkString(Bytes::copy_from_slice(s.as_bytes()))
    }

    fn reply(fields: &[(&str, &str)]) -> BytesFrame {
        BytesFrame::Array(
            fields
                .iter()
                .flat_map(|(k, v)| [bulk(k), bulk(v)])
                .collect(),
        )
    }

    #[test]
    fn hset_carries_every_field() {
        let record = CacheRecord {
            host: "a.com".into(),
            last_update: 1_700_000_000,
            status: OutcomeCode::Error,
            data: String::new(),
            error: "timeout".into(),
        };

        let BytesFrame::Array(args) = hset_record("hb:https://a.com", &record) else {
            panic!("expected array");
        };
        let args: Vec<String> = args.iter().map(bulk_to_string).collect();
        assert_eq!(
            args,
            vec![
                "HSET",
                "hb:https://a.com",
                "hostname",
                "a.com",
                "mtime",
                "1700000000",
                "status",
                "2",
                "data",
                "",
                "error",
                "timeout",
            ]
        );
    }

    #[test]
    fn decodes_full_record() {
        let frame = reply(&[
            ("hostname", "a.com"),
            ("mtime", "1700000000"),
            ("status", "1"),
            ("data", ""),
            ("error", ""),
        ]);

        let record = decode_record(frame).unwrap().unwrap();
        assert_eq!(record.host, "a.com");
        assert_eq!(record.last_update, 1_700_000_000);
        assert_eq!(record.status, OutcomeCode::Safe);
    }

    #[test]
    fn empty_reply_is_absent() {
        assert!(decode_record(BytesFrame::Array(vec![])).unwrap().is_none());
        assert!(decode_record(BytesFrame::Null).unwrap().is_none());
    }

    #[test]
    fn malformed_records_are_decode_errors() {
        let bad_mtime = reply(&[("mtime", "yesterday"), ("status", "1")]);
        assert!(matches!(decode_record(bad_mtime), Err(StoreError::Decode(_))));

        let missing_status = reply(&[("hostname", "a.com"), ("mtime", "1")]);
        assert!(matches!(
            decode_record(missing_status),
            Err(StoreError::Decode(_))
        ));

        let out_of_range = reply(&[("mtime", "1"), ("status", "7")]);
        assert!(matches!(decode_record(out_of_range), Err(StoreError::Decode(_))));

        let odd = BytesFrame::Array(vec![bulk("mtime")]);
        assert!(matches!(decode_record(odd), Err(StoreError::Decode(_))));
    }

    #[test]
    fn error_reply_is_a_backend_error() {
        let frame = BytesFrame::Error("WRONGTYPE Operation against a key".into());
        assert!(matches!(decode_record(frame), Err(StoreError::Backend(_))));
    }
}
