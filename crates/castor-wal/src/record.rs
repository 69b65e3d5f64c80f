//! WAL record framing.
//!
//! A record is a fixed 33-byte header followed by a payload. Data records
//! (INSERT, DELETE, UPDATE) carry the target page, the key, and
//! explicitly length-prefixed old/new value images; control records
//! (CHECKPOINT, COMMIT, ABORT) have no payload.

use bytes::{Buf, BufMut, BytesMut};

use castor_common::constants::WAL_RECORD_HEADER_SIZE;
use castor_common::error::{CastorError, CastorResult};
use castor_common::types::{Lsn, PageId, TxnId};
use castor_common::KeyCodec;

/// Record type identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Key inserted.
    Insert = 1,
    /// Key deleted.
    Delete = 2,
    /// Value overwritten for an existing key.
    Update = 3,
    /// Checkpoint boundary.
    Checkpoint = 4,
    /// Transaction commit.
    Commit = 5,
    /// Transaction abort.
    Abort = 6,
}

impl RecordType {
    /// Converts the record type to its wire byte.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Parses a record type from its wire byte.
    ///
    /// # Errors
    ///
    /// Returns a corruption error for unknown bytes.
    pub fn from_u8(value: u8) -> CastorResult<Self> {
        match value {
            1 => Ok(Self::Insert),
            2 => Ok(Self::Delete),
            3 => Ok(Self::Update),
            4 => Ok(Self::Checkpoint),
            5 => Ok(Self::Commit),
            6 => Ok(Self::Abort),
            _ => Err(CastorError::corruption(format!(
                "unknown WAL record type {value}"
            ))),
        }
    }

    /// Returns true for record types that carry a data payload.
    #[must_use]
    pub const fn is_data_record(self) -> bool {
        matches!(self, Self::Insert | Self::Delete | Self::Update)
    }
}

/// The fixed-size record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    /// Type of record.
    pub record_type: RecordType,
    /// Total record size in bytes, header included.
    pub record_size: u32,
    /// Transaction that produced the record.
    pub txn_id: TxnId,
    /// Log sequence number.
    pub lsn: Lsn,
    /// CRC32 over the record with this field zeroed.
    pub checksum: u32,
    /// Wall-clock timestamp in milliseconds since the Unix epoch.
    pub timestamp_ms: i64,
}

impl RecordHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = WAL_RECORD_HEADER_SIZE;

    /// Byte offset of the checksum field within the record.
    pub const CHECKSUM_OFFSET: usize = 21;

    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u8(self.record_type.as_u8());
        buf.put_u32_le(self.record_size);
        buf.put_u64_le(self.txn_id.as_u64());
        buf.put_u64_le(self.lsn.as_u64());
        buf.put_u32_le(self.checksum);
        buf.put_i64_le(self.timestamp_ms);
    }

    fn deserialize(buf: &mut &[u8]) -> CastorResult<Self> {
        if buf.remaining() < Self::SIZE {
            return Err(CastorError::corruption("truncated WAL record header"));
        }
        let record_type = RecordType::from_u8(buf.get_u8())?;
        let record_size = buf.get_u32_le();
        let txn_id = TxnId::new(buf.get_u64_le());
        let lsn = Lsn::new(buf.get_u64_le());
        let checksum = buf.get_u32_le();
        let timestamp_ms = buf.get_i64_le();
        Ok(Self {
            record_type,
            record_size,
            txn_id,
            lsn,
            checksum,
            timestamp_ms,
        })
    }
}

/// Payload of a data record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPayload<K> {
    /// Page the operation targeted.
    pub page_id: PageId,
    /// The key operated on.
    pub key: K,
    /// Before image; empty for INSERT.
    pub old_data: Vec<u8>,
    /// After image; empty for DELETE.
    pub new_data: Vec<u8>,
}

impl<K: KeyCodec> DataPayload<K> {
    fn serialize(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.page_id.as_u16());
        self.key.encode(buf);
        buf.put_u32_le(self.old_data.len() as u32);
        buf.put_slice(&self.old_data);
        buf.put_u32_le(self.new_data.len() as u32);
        buf.put_slice(&self.new_data);
    }

    fn serialized_len(&self) -> usize {
        2 + self.key.encoded_len() + 4 + self.old_data.len() + 4 + self.new_data.len()
    }

    fn deserialize(buf: &mut &[u8]) -> CastorResult<Self> {
        if buf.remaining() < 2 {
            return Err(CastorError::corruption("truncated data payload"));
        }
        let page_id = PageId::new(buf.get_u16_le());
        let key = K::decode(buf)?;

        if buf.remaining() < 4 {
            return Err(CastorError::corruption("truncated old image length"));
        }
        let old_len = buf.get_u32_le() as usize;
        if buf.remaining() < old_len {
            return Err(CastorError::corruption("old image exceeds buffer"));
        }
        let old_data = buf[..old_len].to_vec();
        buf.advance(old_len);

        if buf.remaining() < 4 {
            return Err(CastorError::corruption("truncated new image length"));
        }
        let new_len = buf.get_u32_le() as usize;
        if buf.remaining() < new_len {
            return Err(CastorError::corruption("new image exceeds buffer"));
        }
        let new_data = buf[..new_len].to_vec();
        buf.advance(new_len);

        Ok(Self {
            page_id,
            key,
            old_data,
            new_data,
        })
    }
}

/// A complete WAL record.
#[derive(Debug, Clone)]
pub struct WalRecord<K> {
    /// Record header.
    pub header: RecordHeader,
    /// Payload; present exactly for data record types.
    pub payload: Option<DataPayload<K>>,
}

impl<K: KeyCodec> WalRecord<K> {
    /// Builds a record, computing its size. The checksum is filled in by
    /// [`serialize`](Self::serialize).
    #[must_use]
    pub fn new(
        record_type: RecordType,
        txn_id: TxnId,
        lsn: Lsn,
        timestamp_ms: i64,
        payload: Option<DataPayload<K>>,
    ) -> Self {
        debug_assert_eq!(record_type.is_data_record(), payload.is_some());
        let payload_len = payload.as_ref().map_or(0, DataPayload::serialized_len);
        Self {
            header: RecordHeader {
                record_type,
                record_size: (RecordHeader::SIZE + payload_len) as u32,
                txn_id,
                lsn,
                checksum: 0,
                timestamp_ms,
            },
            payload,
        }
    }

    /// Returns the record LSN.
    #[must_use]
    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn txn_id(&self) -> TxnId {
        self.header.txn_id
    }

    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> RecordType {
        self.header.record_type
    }

    /// Serialises the record, stamping the checksum.
    #[must_use]
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.header.record_size as usize);
        self.header.serialize(&mut buf);
        if let Some(payload) = &self.payload {
            payload.serialize(&mut buf);
        }

        let mut bytes = buf.to_vec();
        let checksum = compute_record_checksum(&bytes);
        bytes[RecordHeader::CHECKSUM_OFFSET..RecordHeader::CHECKSUM_OFFSET + 4]
            .copy_from_slice(&checksum.to_le_bytes());
        bytes
    }

    /// Deserialises one record from the front of `bytes`.
    ///
    /// Returns the record and the number of bytes consumed. Any framing
    /// problem (short header, `record_size` below the header size, torn
    /// payload, checksum mismatch) is a corruption error, which replay
    /// treats as the end of the valid log.
    pub fn deserialize(bytes: &[u8]) -> CastorResult<(Self, usize)> {
        let mut buf = bytes;
        let header = RecordHeader::deserialize(&mut buf)?;

        let record_size = header.record_size as usize;
        if record_size < RecordHeader::SIZE {
            return Err(CastorError::wal_corrupted(
                header.lsn,
                format!("record_size {record_size} below header size"),
            ));
        }
        if bytes.len() < record_size {
            return Err(CastorError::wal_corrupted(header.lsn, "torn record"));
        }

        let computed = compute_record_checksum(&bytes[..record_size]);
        if computed != header.checksum {
            return Err(CastorError::ChecksumMismatch {
                expected: header.checksum,
                actual: computed,
            });
        }

        let payload = if header.record_type.is_data_record() {
            let mut payload_buf = &bytes[RecordHeader::SIZE..record_size];
            let payload = DataPayload::deserialize(&mut payload_buf)?;
            if payload_buf.has_remaining() {
                return Err(CastorError::wal_corrupted(
                    header.lsn,
                    "trailing bytes after data payload",
                ));
            }
            Some(payload)
        } else {
            if record_size != RecordHeader::SIZE {
                return Err(CastorError::wal_corrupted(
                    header.lsn,
                    "control record with payload",
                ));
            }
            None
        };

        Ok((Self { header, payload }, record_size))
    }
}

/// CRC32 over a record image with the checksum field zeroed.
#[must_use]
pub fn compute_record_checksum(record: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&record[..RecordHeader::CHECKSUM_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&record[RecordHeader::CHECKSUM_OFFSET + 4..]);
    hasher.finalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload() -> DataPayload<u32> {
        DataPayload {
            page_id: PageId::new(7),
            key: 42,
            old_data: vec![],
            new_data: vec![1, 2, 3, 4],
        }
    }

    #[test]
    fn test_record_type_roundtrip() {
        for rt in [
            RecordType::Insert,
            RecordType::Delete,
            RecordType::Update,
            RecordType::Checkpoint,
            RecordType::Commit,
            RecordType::Abort,
        ] {
            assert_eq!(RecordType::from_u8(rt.as_u8()).unwrap(), rt);
        }
        assert!(RecordType::from_u8(0).is_err());
        assert!(RecordType::from_u8(99).is_err());
    }

    #[test]
    fn test_data_record_roundtrip() {
        let record = WalRecord::new(
            RecordType::Insert,
            TxnId::new(3),
            Lsn::new(11),
            1_700_000_000_000,
            Some(sample_payload()),
        );
        let bytes = record.serialize();
        assert_eq!(bytes.len(), record.header.record_size as usize);

        let (decoded, consumed) = WalRecord::<u32>::deserialize(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded.record_type(), RecordType::Insert);
        assert_eq!(decoded.txn_id(), TxnId::new(3));
        assert_eq!(decoded.lsn(), Lsn::new(11));
        assert_eq!(decoded.payload.unwrap(), sample_payload());
    }

    #[test]
    fn test_control_record_roundtrip() {
        let record: WalRecord<u32> =
            WalRecord::new(RecordType::Commit, TxnId::new(9), Lsn::new(5), 0, None);
        let bytes = record.serialize();
        assert_eq!(bytes.len(), RecordHeader::SIZE);

        let (decoded, _) = WalRecord::<u32>::deserialize(&bytes).unwrap();
        assert_eq!(decoded.record_type(), RecordType::Commit);
        assert!(decoded.payload.is_none());
    }

    #[test]
    fn test_update_record_separates_images() {
        let payload = DataPayload {
            page_id: PageId::new(1),
            key: 5u32,
            old_data: b"old".to_vec(),
            new_data: b"newer".to_vec(),
        };
        let record = WalRecord::new(
            RecordType::Update,
            TxnId::new(1),
            Lsn::new(1),
            0,
            Some(payload),
        );
        let (decoded, _) = WalRecord::<u32>::deserialize(&record.serialize()).unwrap();
        let payload = decoded.payload.unwrap();
        assert_eq!(payload.old_data, b"old");
        assert_eq!(payload.new_data, b"newer");
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let record = WalRecord::new(
            RecordType::Insert,
            TxnId::new(1),
            Lsn::new(1),
            0,
            Some(sample_payload()),
        );
        let mut bytes = record.serialize();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;

        let err = WalRecord::<u32>::deserialize(&bytes).unwrap_err();
        assert!(matches!(err, CastorError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_undersized_record_size_rejected() {
        let record: WalRecord<u32> =
            WalRecord::new(RecordType::Abort, TxnId::new(1), Lsn::new(1), 0, None);
        let mut bytes = record.serialize();
        bytes[1..5].copy_from_slice(&10u32.to_le_bytes());

        let err = WalRecord::<u32>::deserialize(&bytes).unwrap_err();
        assert!(err.is_corruption());
    }

    #[test]
    fn test_torn_record_rejected() {
        let record = WalRecord::new(
            RecordType::Insert,
            TxnId::new(1),
            Lsn::new(1),
            0,
            Some(sample_payload()),
        );
        let bytes = record.serialize();
        let err = WalRecord::<u32>::deserialize(&bytes[..bytes.len() - 2]).unwrap_err();
        assert!(err.is_corruption());
    }
}
