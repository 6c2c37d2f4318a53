//! Error types, built with `error_chain`.

error_chain! {
    foreign_links {
        Io(::std::io::Error);
        Serial(::tokio_serial::Error);
    }

    errors {
        // A script line could not be compiled. Carries the 1-based line number, the offending
        // text and the reason.
        Syntax(line: usize, text: String, reason: String) {
            description("script syntax error")
            display("line {}: {} ({})", line, reason, text.trim_end())
        }
        Timeout(received: usize, expected: usize) {
            description("timed out waiting for the module")
            display("timeout: received {} of {} expected bytes", received, expected)
        }
        ShortFrame(len: usize) {
            description("response frame too short")
            display("not enough data: {} bytes", len)
        }
        BadChecksum(computed: u16, received: u16) {
            description("response checksum mismatch")
            display("bad checksum: computed {:#06x}, received {:#06x}", computed, received)
        }
        DeviceException(function: u8, code: u8) {
            description("module rejected the request")
            display("module returned exception {:#04x} for function {:#04x}", code, function)
        }
        UnexpectedResponse(dump: String) {
            description("unrecognized response frame")
            display("unknown valid msg: {}", dump)
        }
        // The module reported an OVP/OCP/OPP trip.
        Protection(code: u16) {
            description("module protection tripped")
            display("*** PROTECTION {} ({}) ***", code, crate::data::protection_name (*code))
        }
    }
}
