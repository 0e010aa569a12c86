use std::env;
use std::process;

use relay_kit::device::BindingStatus;

fn print_status() {
    match relay_kit::control::api::get_status() {
        Some(status) => {
            println!("Device      : {}", status.device_name);
            println!("Sample Rate : {} Hz", status.sample_rate);
            println!("Latency     : {:.2} ms", status.latency_ms);
            println!("IO Clients  : {}", status.io_running);
            println!("Relay Cycles: {}", status.relay_cycles);
            println!("Overruns    : {}", status.overruns);
            println!("Drift       : {:.1} ppm", status.drift_ppm);
            match status.sample_delta {
                Some(delta) => println!("Delta       : {delta:.0} frames"),
                None => println!("Delta       : not established"),
            }
            println!(
                "Volume      : L {:.1} dB / R {:.1} dB{}{}",
                status.volume_l_db,
                status.volume_r_db,
                if status.mute { " (muted)" } else { "" },
                if status.controls_exposed {
                    ""
                } else {
                    " (controls off)"
                },
            );
            match status.binding {
                BindingStatus::Unbound => println!("Output      : none (silent)"),
                BindingStatus::Resolving => println!("Output      : resolving..."),
                BindingStatus::Bound {
                    uid,
                    name,
                    buffer_frames,
                    sample_rate,
                    started,
                } => {
                    println!(
                        "Output      : {name} [{uid}] @ {sample_rate} Hz, {buffer_frames} frames{}",
                        if started { "" } else { " (stopped)" }
                    );
                }
            }
        }
        None => {
            eprintln!("relayctl: no active driver detected");
            process::exit(1);
        }
    }
}

fn list_devices() {
    let devices = relay_kit::control::api::list_output_devices();
    if devices.is_empty() {
        println!("No output devices reported");
        return;
    }
    for device in devices {
        println!(
            "{} [{}] {} ch @ {} Hz{}",
            device.name,
            device.uid,
            device.output_channels,
            device.sample_rate,
            if device.alive { "" } else { " (dead)" },
        );
    }
}

fn main() {
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        match arg.as_str() {
            "--status" | "-s" => {
                print_status();
                return;
            }
            "--devices" | "-d" => {
                list_devices();
                return;
            }
            "--set-device" => {
                let uid = args.next();
                if !relay_kit::control::api::set_output_device(uid) {
                    eprintln!("relayctl: no active driver detected");
                    process::exit(1);
                }
                return;
            }
            "--set-buffer" => {
                let Some(frames) = args.next().and_then(|v| v.parse::<u32>().ok()) else {
                    eprintln!("relayctl: --set-buffer requires a frame count");
                    process::exit(1);
                };
                if !relay_kit::control::api::set_output_buffer_frames(frames) {
                    eprintln!("relayctl: no active driver detected");
                    process::exit(1);
                }
                return;
            }
            "--help" | "-h" => {
                println!(
                    "Usage: relayctl [--status | --devices | --set-device <uid> | --set-buffer <frames>]\n\nWithout arguments the interactive console launches."
                );
                return;
            }
            other => {
                eprintln!("relayctl: unknown argument '{other}'");
                process::exit(1);
            }
        }
    }

    if let Err(err) = relay_kit::control::ui::run() {
        eprintln!("relayctl: {err}");
        process::exit(1);
    }
}
