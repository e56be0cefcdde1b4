// SPDX-License-Identifier: GPL-3.0-only

// Re-export only the actual code, the `generated` modules below isolate the
// scanner output and its imports.
pub use generated::server::{
    zkwinft_output_configuration_v1, zkwinft_output_device_v1, zkwinft_output_management_v1,
};


#[allow(non_snake_case, non_upper_case_globals, non_camel_case_types)]
mod generated {
    pub mod server {
        use smithay::reexports::wayland_server::{self, protocol::*};

        pub mod __interfaces {
            use smithay::reexports::wayland_server::protocol::__interfaces::*;
            use wayland_backend;
            wayland_scanner::generate_interfaces!(
                "resources/protocols/kwinft-output-management-unstable-v1.xml"
            );
        }
        use self::__interfaces::*;

        wayland_scanner::generate_server_code!(
            "resources/protocols/kwinft-output-management-unstable-v1.xml"
        );
    }

}
