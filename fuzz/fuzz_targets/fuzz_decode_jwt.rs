#![no_main]
use libfuzzer_sys::fuzz_target;
use volvo_connector::volvo::parse::{parse_status_section, parse_vehicle_list};
use volvo_connector::volvo::StatusEndpoint;

fuzz_target!(|data: &[u8]| {
    // Tokens come from config files and the token endpoint
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = volvo_connector::auth::decode_unverified_for_expiry(text);

        // Same bytes as an API payload
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(text) {
            let logger = volvo_connector::logging::get_api_logger("fuzz");
            let _ = parse_vehicle_list(&value);
            for endpoint in StatusEndpoint::ALL {
                let _ = parse_status_section(endpoint, &value, &logger);
            }
        }
    }
});
