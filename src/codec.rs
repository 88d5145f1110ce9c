// Wire protocol — every message is a 3-byte ASCII tag followed by a
// deterministic binary encoding of an ordered key-value map: entries
// sorted by key, each written as [u16 LE key len][key][u32 LE value
// len][value]. This is the same canonicalisation `hash_map` uses for
// `id` computation, just serialized instead of digested.
use std::collections::BTreeMap;

use crate::error::CodecError;
use crate::primitives::{Block, Transaction};

pub const TAG_TXN: [u8; 3] = *b"TXN";
pub const TAG_BLK: [u8; 3] = *b"BLK";
pub const TAG_GLK: [u8; 3] = *b"GLK";
pub const TAG_HEY: [u8; 3] = *b"HEY";
pub const TAG_ACK: [u8; 3] = *b"ACK";
pub const TAG_RBH: [u8; 3] = *b"RBH";
pub const TAG_BLH: [u8; 3] = *b"BLH";
pub const TAG_RBL: [u8; 3] = *b"RBL";
pub const TAG_ABL: [u8; 3] = *b"ABL";
pub const TAG_LRQ: [u8; 3] = *b"LRQ";
pub const TAG_LRS: [u8; 3] = *b"LRS";

#[derive(Debug, Clone)]
pub enum Message {
    Txn(Transaction),
    Blk(Block),
    Glk(Block),
    Hey { address: String, request_id: u64 },
    Ack { address: String, request_id: u64 },
    Rbh { my_height: u64, request_id: u64 },
    Blh { height: u64, address: String, request_id: u64 },
    Rbl { start_from: u64, request_id: u64 },
    Abl { blocks: Vec<Block>, request_id: u64 },
    Lrq { my_address: String, request_id: u64 },
    Lrs { its_address: String, request_id: u64 },
}

impl Message {
    pub fn tag(&self) -> [u8; 3] {
        match self {
            Message::Txn(_) => TAG_TXN,
            Message::Blk(_) => TAG_BLK,
            Message::Glk(_) => TAG_GLK,
            Message::Hey { .. } => TAG_HEY,
            Message::Ack { .. } => TAG_ACK,
            Message::Rbh { .. } => TAG_RBH,
            Message::Blh { .. } => TAG_BLH,
            Message::Rbl { .. } => TAG_RBL,
            Message::Abl { .. } => TAG_ABL,
            Message::Lrq { .. } => TAG_LRQ,
            Message::Lrs { .. } => TAG_LRS,
        }
    }

    /// Every message's request id, when it carries one. Broadcast
    /// messages (`TXN`, `BLK`, `GLK`) are fire-and-forget and have none.
    pub fn request_id(&self) -> Option<u64> {
        match self {
            Message::Txn(_) | Message::Blk(_) | Message::Glk(_) => None,
            Message::Hey { request_id, .. }
            | Message::Ack { request_id, .. }
            | Message::Rbh { request_id, .. }
            | Message::Blh { request_id, .. }
            | Message::Rbl { request_id, .. }
            | Message::Abl { request_id, .. }
            | Message::Lrq { request_id, .. }
            | Message::Lrs { request_id, .. } => Some(*request_id),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let fields = match self {
            Message::Txn(tx) => vec![("body".to_string(), json_bytes(tx))],
            Message::Blk(b) => vec![("body".to_string(), json_bytes(b))],
            Message::Glk(b) => vec![("body".to_string(), json_bytes(b))],
            Message::Hey { address, request_id } => vec![
                ("address".to_string(), address.clone().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Ack { address, request_id } => vec![
                ("address".to_string(), address.clone().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Rbh { my_height, request_id } => vec![
                ("my_height".to_string(), my_height.to_string().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Blh { height, address, request_id } => vec![
                ("height".to_string(), height.to_string().into_bytes()),
                ("address".to_string(), address.clone().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Rbl { start_from, request_id } => vec![
                ("start_from".to_string(), start_from.to_string().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Abl { blocks, request_id } => vec![
                ("blocks".to_string(), json_bytes(blocks)),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Lrq { my_address, request_id } => vec![
                ("my_address".to_string(), my_address.clone().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
            Message::Lrs { its_address, request_id } => vec![
                ("its_address".to_string(), its_address.clone().into_bytes()),
                ("request_id".to_string(), request_id.to_string().into_bytes()),
            ],
        };
        let mut out = Vec::new();
        out.extend_from_slice(&self.tag());
        out.extend_from_slice(&encode_map(&fields));
        out
    }

    pub fn decode(data: &[u8]) -> crate::error::Result<Self> {
        if data.len() < 3 {
            return Err(CodecError::BadMap("frame shorter than tag").into());
        }
        let tag: [u8; 3] = data[..3].try_into().unwrap();
        let map = decode_map(&data[3..])?;

        let field = |k: &str| -> crate::error::Result<String> {
            map.get(k)
                .map(|v| String::from_utf8_lossy(v).into_owned())
                .ok_or(CodecError::BadMap("missing required field"))
                .map_err(Into::into)
        };
        let field_u64 = |k: &str| -> crate::error::Result<u64> {
            field(k)?.parse::<u64>().map_err(|_| CodecError::BadMap("field is not a u64").into())
        };

        Ok(match tag {
            TAG_TXN => Message::Txn(json_parse(map.get("body"), &tag, TAG_TXN)?),
            TAG_BLK => Message::Blk(json_parse(map.get("body"), &tag, TAG_BLK)?),
            TAG_GLK => Message::Glk(json_parse(map.get("body"), &tag, TAG_GLK)?),
            TAG_HEY => Message::Hey { address: field("address")?, request_id: field_u64("request_id")? },
            TAG_ACK => Message::Ack { address: field("address")?, request_id: field_u64("request_id")? },
            TAG_RBH => Message::Rbh { my_height: field_u64("my_height")?, request_id: field_u64("request_id")? },
            TAG_BLH => Message::Blh {
                height: field_u64("height")?,
                address: field("address")?,
                request_id: field_u64("request_id")?,
            },
            TAG_RBL => Message::Rbl { start_from: field_u64("start_from")?, request_id: field_u64("request_id")? },
            TAG_ABL => Message::Abl {
                blocks: json_parse(map.get("blocks"), &tag, TAG_ABL)?,
                request_id: field_u64("request_id")?,
            },
            TAG_LRQ => Message::Lrq { my_address: field("my_address")?, request_id: field_u64("request_id")? },
            TAG_LRS => Message::Lrs { its_address: field("its_address")?, request_id: field_u64("request_id")? },
            found => {
                return Err(CodecError::BadTag { expected: "one of the known wire tags", found }.into())
            }
        })
    }

    /// Decodes a block-bearing message, resolving `BLK` vs `GLK` by
    /// tag as the genesis/regular discriminator.
    pub fn decode_expecting_block(data: &[u8]) -> crate::error::Result<Block> {
        match Self::decode(data)? {
            Message::Blk(b) | Message::Glk(b) => Ok(b),
            other => Err(CodecError::BadTag { expected: "BLK or GLK", found: other.tag() }.into()),
        }
    }
}

fn json_bytes<T: serde::Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("domain types always serialize")
}

fn json_parse<T: serde::de::DeserializeOwned>(
    bytes: Option<&Vec<u8>>,
    found: &[u8; 3],
    expected_tag: [u8; 3],
) -> crate::error::Result<T> {
    let bytes = bytes.ok_or(CodecError::BadMap("missing body field"))?;
    let _ = expected_tag;
    serde_json::from_slice(bytes).map_err(|_| {
        crate::error::Error::Codec(CodecError::BadTag { expected: "well-formed body", found: *found })
    })
}

fn encode_map(fields: &[(String, Vec<u8>)]) -> Vec<u8> {
    let mut sorted: Vec<&(String, Vec<u8>)> = fields.iter().collect();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));
    let mut out = Vec::new();
    for (k, v) in sorted {
        out.extend_from_slice(&(k.len() as u16).to_le_bytes());
        out.extend_from_slice(k.as_bytes());
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        out.extend_from_slice(v);
    }
    out
}

fn decode_map(data: &[u8]) -> crate::error::Result<BTreeMap<String, Vec<u8>>> {
    let mut map = BTreeMap::new();
    let mut off = 0usize;
    while off < data.len() {
        if data.len() < off + 2 {
            return Err(CodecError::BadMap("truncated key length").into());
        }
        let klen = u16::from_le_bytes(data[off..off + 2].try_into().unwrap()) as usize;
        off += 2;
        if data.len() < off + klen {
            return Err(CodecError::BadMap("truncated key").into());
        }
        let key = String::from_utf8_lossy(&data[off..off + klen]).into_owned();
        off += klen;
        if data.len() < off + 4 {
            return Err(CodecError::BadMap("truncated value length").into());
        }
        let vlen = u32::from_le_bytes(data[off..off + 4].try_into().unwrap()) as usize;
        off += 4;
        if data.len() < off + vlen {
            return Err(CodecError::BadMap("truncated value").into());
        }
        let value = data[off..off + vlen].to_vec();
        off += vlen;
        map.insert(key, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::signer::generate_keypair;

    #[test]
    fn hey_roundtrips() {
        let msg = Message::Hey { address: "addr1".to_string(), request_id: 42 };
        let bytes = msg.encode();
        assert_eq!(&bytes[..3], &TAG_HEY);
        let decoded = Message::decode(&bytes).unwrap();
        match decoded {
            Message::Hey { address, request_id } => {
                assert_eq!(address, "addr1");
                assert_eq!(request_id, 42);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn txn_roundtrips() {
        let (sk, _) = generate_keypair();
        let tx = Transaction::new(1, &sk, None, 10, None, 1_700_000_000);
        let msg = Message::Txn(tx.clone());
        let decoded = Message::decode(&msg.encode()).unwrap();
        match decoded {
            Message::Txn(t) => assert_eq!(t.id, tx.id),
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn bad_tag_is_rejected() {
        let mut bytes = Message::Hey { address: "a".to_string(), request_id: 1 }.encode();
        bytes[0] = b'X';
        assert!(Message::decode(&bytes).is_err());
    }

    #[test]
    fn truncated_frame_is_rejected() {
        let bytes = Message::Hey { address: "a".to_string(), request_id: 1 }.encode();
        assert!(Message::decode(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn blk_and_glk_both_decode_as_block() {
        let block = crate::primitives::Block::candidate(
            1,
            crate::crypto::hash::BLANK_SHA_256.to_string(),
            "state".to_string(),
            vec![],
            "coinbase".to_string(),
            "{}".to_string(),
            0,
            0,
            1,
        )
        .with_nonce(0);
        let glk = Message::Glk(block.clone()).encode();
        let blk = Message::Blk(block.clone()).encode();
        assert_eq!(Message::decode_expecting_block(&glk).unwrap().id, block.id);
        assert_eq!(Message::decode_expecting_block(&blk).unwrap().id, block.id);
    }
}
