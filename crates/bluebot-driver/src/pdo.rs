//! PDO 寄存器表
//!
//! 按 `(channel, device)` 寻址的稀疏表，每个槽位保存该地址最近一次广播的 8 字节原始数据。
//! 接收线程被动更新，调用方线程通过类型化访问器读取。
//!
//! 每个槽位由独立的锁保护：更新和读取都在锁内整体完成，读取方永远看不到写了一半的数据，
//! 接收线程更新槽位也不分配内存。

use crate::error::PdoError;
use bluebot_protocol::PdoKey;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;

/// 槽位大小（字节）
pub const PDO_SLOT_LEN: usize = 8;

/// PDO 寄存器表
#[derive(Debug, Default)]
pub struct PdoStore {
    slots: RwLock<HashMap<PdoKey, Mutex<[u8; PDO_SLOT_LEN]>>>,
}

impl PdoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 分配并清零一个槽位
    ///
    /// 重复注册同一个键返回 `PdoError::AlreadyRegistered`。
    pub fn register(&self, key: PdoKey) -> Result<(), PdoError> {
        let mut slots = self.slots.write();
        if slots.contains_key(&key) {
            return Err(PdoError::AlreadyRegistered {
                channel: key.channel(),
                device: key.device(),
            });
        }
        slots.insert(key, Mutex::new([0u8; PDO_SLOT_LEN]));
        Ok(())
    }

    pub fn is_registered(&self, key: PdoKey) -> bool {
        self.slots.read().contains_key(&key)
    }

    /// 用帧数据覆盖槽位（按长度截断，超出部分保持原值）
    ///
    /// 槽位未注册时返回 `false`。
    pub fn update(&self, key: PdoKey, payload: &[u8]) -> bool {
        let slots = self.slots.read();
        let Some(slot) = slots.get(&key) else {
            return false;
        };

        let len = payload.len().min(PDO_SLOT_LEN);
        slot.lock()[..len].copy_from_slice(&payload[..len]);
        true
    }

    /// 读取槽位的原始 8 字节
    pub fn raw(&self, key: PdoKey) -> Result<[u8; PDO_SLOT_LEN], PdoError> {
        let slots = self.slots.read();
        let slot = slots.get(&key).ok_or(PdoError::NotRegistered {
            channel: key.channel(),
            device: key.device(),
        })?;
        Ok(*slot.lock())
    }

    /// 小端无符号解码，`width ∈ {1, 2, 4}`
    pub fn get_unsigned(&self, key: PdoKey, offset: usize, width: usize) -> Result<u32, PdoError> {
        check_field(offset, width)?;
        let raw = self.raw(key)?;
        let field = &raw[offset..offset + width];
        Ok(field
            .iter()
            .rev()
            .fold(0u32, |acc, &byte| (acc << 8) | u32::from(byte)))
    }

    /// 小端有符号解码（按宽度符号扩展），`width ∈ {1, 2, 4}`
    pub fn get_signed(&self, key: PdoKey, offset: usize, width: usize) -> Result<i32, PdoError> {
        check_field(offset, width)?;
        let raw = self.raw(key)?;
        let value = match width {
            1 => i32::from(raw[offset] as i8),
            2 => i32::from(i16::from_le_bytes([raw[offset], raw[offset + 1]])),
            _ => i32::from_le_bytes([
                raw[offset],
                raw[offset + 1],
                raw[offset + 2],
                raw[offset + 3],
            ]),
        };
        Ok(value)
    }

    /// 已注册槽位数量
    pub fn len(&self) -> usize {
        self.slots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.read().is_empty()
    }

    /// 所有已注册的键（按 channel、device 排序）
    pub fn keys(&self) -> Vec<PdoKey> {
        let mut keys: Vec<PdoKey> = self.slots.read().keys().copied().collect();
        keys.sort();
        keys
    }
}

fn check_field(offset: usize, width: usize) -> Result<(), PdoError> {
    if !matches!(width, 1 | 2 | 4) {
        return Err(PdoError::UnsupportedWidth(width));
    }
    match offset.checked_add(width) {
        Some(end) if end <= PDO_SLOT_LEN => Ok(()),
        _ => Err(PdoError::OutOfRange { offset, width }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(channel: u8, device: u8) -> PdoKey {
        PdoKey::new(channel, device).unwrap()
    }

    #[test]
    fn test_register_zero_initializes() {
        let store = PdoStore::new();
        store.register(key(1, 5)).unwrap();
        assert_eq!(store.raw(key(1, 5)).unwrap(), [0u8; 8]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_register_twice_is_rejected() {
        let store = PdoStore::new();
        store.register(key(2, 1)).unwrap();
        assert_eq!(
            store.register(key(2, 1)),
            Err(PdoError::AlreadyRegistered {
                channel: 2,
                device: 1
            })
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_unregistered_access_fails() {
        let store = PdoStore::new();
        assert_eq!(
            store.get_unsigned(key(3, 9), 0, 2),
            Err(PdoError::NotRegistered {
                channel: 3,
                device: 9
            })
        );
        assert!(!store.update(key(3, 9), &[1, 2, 3]));
    }

    #[test]
    fn test_update_is_length_bounded() {
        let store = PdoStore::new();
        store.register(key(1, 0)).unwrap();
        store.update(key(1, 0), &[1, 2, 3, 4, 5, 6, 7, 8]);
        store.update(key(1, 0), &[0xAA, 0xBB]);
        assert_eq!(store.raw(key(1, 0)).unwrap(), [0xAA, 0xBB, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_typed_decode_little_endian() {
        let store = PdoStore::new();
        store.register(key(1, 1)).unwrap();
        store.update(key(1, 1), &[0xFE, 0xFF, 0x34, 0x12, 0x00, 0x00, 0x00, 0x80]);

        assert_eq!(store.get_unsigned(key(1, 1), 0, 1).unwrap(), 0xFE);
        assert_eq!(store.get_signed(key(1, 1), 0, 1).unwrap(), -2);
        assert_eq!(store.get_signed(key(1, 1), 0, 2).unwrap(), -2);
        assert_eq!(store.get_unsigned(key(1, 1), 0, 2).unwrap(), 0xFFFE);
        assert_eq!(store.get_unsigned(key(1, 1), 2, 2).unwrap(), 0x1234);
        assert_eq!(store.get_unsigned(key(1, 1), 4, 4).unwrap(), 0x8000_0000);
        assert_eq!(store.get_signed(key(1, 1), 4, 4).unwrap(), i32::MIN);
    }

    #[test]
    fn test_out_of_range_and_width() {
        let store = PdoStore::new();
        store.register(key(1, 1)).unwrap();
        assert_eq!(
            store.get_signed(key(1, 1), 6, 4),
            Err(PdoError::OutOfRange {
                offset: 6,
                width: 4
            })
        );
        assert_eq!(
            store.get_unsigned(key(1, 1), usize::MAX, 2),
            Err(PdoError::OutOfRange {
                offset: usize::MAX,
                width: 2
            })
        );
        assert_eq!(
            store.get_unsigned(key(1, 1), 0, 3),
            Err(PdoError::UnsupportedWidth(3))
        );
        assert!(store.get_unsigned(key(1, 1), 4, 4).is_ok());
    }

    #[test]
    fn test_keys_sorted() {
        let store = PdoStore::new();
        store.register(key(3, 0)).unwrap();
        store.register(key(1, 7)).unwrap();
        assert_eq!(store.keys(), vec![key(1, 7), key(3, 0)]);
    }

    #[test]
    fn test_concurrent_reader_never_sees_torn_slot() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = PdoStore::new();
        store.register(key(1, 2)).unwrap();
        let done = AtomicBool::new(false);

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for round in 0..20_000u32 {
                    let n = (round % 251) as u8;
                    assert!(store.update(key(1, 2), &[n; 8]));
                }
                done.store(true, Ordering::Release);
            });

            let mut reads = 0u64;
            while !done.load(Ordering::Acquire) || reads == 0 {
                let raw = store.raw(key(1, 2)).unwrap();
                assert!(raw.iter().all(|&byte| byte == raw[0]), "torn slot: {:?}", raw);
                reads += 1;
            }
        });

        assert_eq!(store.raw(key(1, 2)).unwrap(), [(19_999 % 251) as u8; 8]);
    }

    #[test]
    fn test_concurrent_partial_writers_keep_their_halves() {
        let store = PdoStore::new();
        store.register(key(2, 2)).unwrap();

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for _ in 0..5_000 {
                    store.update(key(2, 2), &[0x11; 4]);
                }
            });
            scope.spawn(|| {
                for _ in 0..5_000 {
                    store.update(key(2, 2), &[0x22; 8]);
                }
            });
        });

        // 两个写者交错后，前 4 字节取决于最后一次写入，但每段内部一致
        let raw = store.raw(key(2, 2)).unwrap();
        assert!(raw[..4].iter().all(|&byte| byte == raw[0]));
        assert_eq!(raw[4..], [0x22; 4]);
    }
}
