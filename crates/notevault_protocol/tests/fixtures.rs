//! Decryption of payloads produced by other clients.

use notevault_model::{ContentType, Payload};
use notevault_protocol::{KeyParams, ProtocolService, ProtocolVersion, WrappingKey};
use serde_json::json;

const PASSWORD: &str = "1234567890";
const UUID: &str = "e3acaf70-3f57-4366-84d2-f3605b35a10f";

fn key_params() -> KeyParams {
    serde_json::from_value(json!({
        "pw_nonce": "c5dbfffc312415c075d203429d6f78fc25466847462a2cbb04e39cc1434e002f",
        "pw_cost": 110000,
        "identifier": "testing@test-sn.org",
        "version": "003"
    }))
    .unwrap()
}

fn encrypted_note() -> Payload {
    serde_json::from_value(json!({
        "uuid": UUID,
        "content_type": "Note",
        "created_at": "2020-07-01T03:56:29.511Z",
        "updated_at": "2020-07-01T03:58:32.029Z",
        "enc_item_key": "003:d53aeaf89fdc0b2d31694674bacf75d35ee15978ff8c98402c8598730e1fec8d:e3acaf70-3f57-4366-84d2-f3605b35a10f:13d7a02a11341649c441f06f4de9a089:uFYSNCmJOFT5Im4Yek5dVCE9vMWXsbfVweyuFL17bXKKQ9GexTTQh+IA6HEvF2CSXgbVQqafpnPPSvg503jfqMkTXTPb69R7WLsX/xWkoR/PbGZFxdlyhIJZfiOIOp4vxlI5U4CGrcYE7qHc0PfOfUi0rJry02E4NfN+tyFmmmMQLnadQ9Qn9GiMffP62Qry:eyJwd19ub25jZSI6ImM1ZGJmZmZjMzEyNDE1YzA3NWQyMDM0MjlkNmY3OGZjMjU0NjY4NDc0NjJhMmNiYjA0ZTM5Y2MxNDM0ZTAwMmYiLCJwd19jb3N0IjoxMTAwMDAsImlkZW50aWZpZXIiOiJ0ZXN0aW5nQHRlc3Qtc24ub3JnIiwidmVyc2lvbiI6IjAwMyJ9",
        "content": "003:d01f296b7e0d2408c4b2a319e9ad36acaf74d4a6c136a15a430b9fba96e512c3:e3acaf70-3f57-4366-84d2-f3605b35a10f:c15a224754e405e4bdabd7973ea212d7:/TA9r+xdWP4UHML/cps0LcRbk4j99eTQz+nFOoboeWHI+a/Iz+qssUnvwWL5xcUtu6P9D6CZ+TBw4O7xIeqD2kuaDDSSJk+x204quVWuJLZzbTcBk2vGftWUAdhbe0Ngrs90u2Znqjkl7VuWq6cRfHzIbRs3fMrKQqOY/NLJzGIJ51jlZjosaj+Kaid3L/jc6wzVd+OXAgqxh/++9SiaC6/DdtUbwKPbxGJLmxPcSLQQYgB0ZKoYJNU+fYFnRke6E1v0oHnKqqYALJ1DnyPZ9V0jWqP3k8Kz8jLjw2iDi/s=:eyJwd19ub25jZSI6ImM1ZGJmZmZjMzEyNDE1YzA3NWQyMDM0MjlkNmY3OGZjMjU0NjY4NDc0NjJhMmNiYjA0ZTM5Y2MxNDM0ZTAwMmYiLCJwd19jb3N0IjoxMTAwMDAsImlkZW50aWZpZXIiOiJ0ZXN0aW5nQHRlc3Qtc24ub3JnIiwidmVyc2lvbiI6IjAwMyJ9",
        "auth_hash": null
    }))
    .unwrap()
}

#[test]
fn decrypts_003_note_with_documented_password() {
    let service = ProtocolService::new();
    let params = key_params();
    assert_eq!(params.version, ProtocolVersion::V003);
    assert!(service.validate_key_params(&params).is_ok());

    let root_key = service.compute_root_key(PASSWORD, &params).unwrap();
    let decrypted = service
        .decrypt_payload_with_key(&encrypted_note(), &WrappingKey::Root(root_key))
        .unwrap();

    assert!(!decrypted.error_decrypting);
    assert_eq!(decrypted.content_type, ContentType::Note);
    let content = decrypted.decrypted_content().unwrap();
    assert_eq!(content.title(), Some("Encrypted note"));
    assert_eq!(content.text(), Some("This is a simple note."));
}

#[test]
fn installed_root_key_is_used_for_legacy_payloads() {
    let service = ProtocolService::new();
    service.set_root_key(service.compute_root_key(PASSWORD, &key_params()).unwrap());

    let decrypted = service.decrypt_payload(&encrypted_note()).unwrap();
    assert_eq!(
        decrypted.decrypted_content().and_then(|c| c.title()),
        Some("Encrypted note")
    );
}

#[test]
fn wrong_password_flags_error_instead_of_failing() {
    let service = ProtocolService::new();
    let root_key = service.compute_root_key("not the password", &key_params()).unwrap();
    let out = service
        .decrypt_payload_with_key(&encrypted_note(), &WrappingKey::Root(root_key))
        .unwrap();

    assert!(out.error_decrypting);
    assert!(out.waiting_for_key);
    assert!(out.is_encrypted());
}

#[test]
fn uuid_swap_is_detected() {
    let service = ProtocolService::new();
    let root_key = service.compute_root_key(PASSWORD, &key_params()).unwrap();
    let mut payload = encrypted_note();
    payload.uuid = "00000000-0000-0000-0000-000000000000".into();

    let out = service
        .decrypt_payload_with_key(&payload, &WrappingKey::Root(root_key))
        .unwrap();
    assert!(out.error_decrypting);
}
