#![no_std]
#![no_main]

mod eid;
mod exec;
mod fdwalk;
mod filter;
mod forkexit;
mod maps;
mod offsets;
mod pathwalk;
mod rcu;
mod state;
mod strings;

#[cfg(not(test))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[unsafe(link_section = "license")]
#[unsafe(no_mangle)]
static LICENSE: [u8; 13] = *b"Dual MIT/GPL\0";
