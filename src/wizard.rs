//! Interactive config authoring is out of scope here: no prompt flow is
//! implemented. `--wizard` still exists as a documented CLI flag, printing
//! the schema's required top-level keys and exiting — enough for an
//! operator to hand-author a config file without this binary walking them
//! through it interactively.
pub fn print_schema_help() {
    println!("solar-export-control does not include an interactive config wizard.");
    println!("Hand-author a JSON config file with the following top-level keys:");
    println!();
    println!("  mqtt      {{ host, port, keepalive, protocol, client_id, clean_session, auth?, retain, topics }}");
    println!("  command   {{ target, min_power, max_power, type, throttle, hysteresis, retransmit }}");
    println!("  reading   {{ smoothing, smoothing_sample_size, offset }}");
    println!("  meta      {{ prefix, reset_inverter_on_inactive, telemetry, discovery }}");
    println!("  customize (opaque, passed through to the CustomizeHooks implementation)");
    println!();
    println!("See DESIGN.md for field-level documentation.");
}
