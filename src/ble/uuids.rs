//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants shared with the KGiTON scale firmware.

use uuid::Uuid;

/// Substring every KGiTON scale carries in its advertised name.
pub const PRODUCT_IDENTIFIER: &str = "KGiTON";

/// KGiTON scale service UUID.
pub const SCALE_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_1234_1234_123456789abc);

/// Weight data characteristic UUID (Notify).
///
/// Notifications carry the current weight as a decimal string, e.g. `"75.500"`.
pub const DATA_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd1234_1234_1234_1234_123456789abc);

/// Control characteristic UUID (Write, Notify).
///
/// License keys and disconnect commands are written here; the scale answers
/// on the same characteristic.
pub const CONTROL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd0002_1234_1234_1234_123456789abc);

/// Buzzer characteristic UUID (Write).
pub const BUZZER_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcd9999_1234_1234_1234_123456789abc);

/// Check if an advertised name belongs to a KGiTON scale.
pub fn is_scale_name(name: &str) -> bool {
    name.contains(PRODUCT_IDENTIFIER)
}

/// Check if a characteristic UUID is one of the scale characteristics.
pub fn is_scale_characteristic(uuid: &Uuid) -> bool {
    *uuid == DATA_CHARACTERISTIC_UUID
        || *uuid == CONTROL_CHARACTERISTIC_UUID
        || *uuid == BUZZER_CHARACTERISTIC_UUID
}
