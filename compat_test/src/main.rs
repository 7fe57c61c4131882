mod scenarios;
mod test_ctx;

use wae_compat::set_debug;

fn main() {
    set_debug(true);
    scenarios::run_all();
    println!("compat_test all scenarios passed");
}
