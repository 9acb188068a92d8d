extern crate url_sign;

use chrono::{Duration, Utc};
use log::LevelFilter;
use url_sign::*;

static KEY: &str = "my-sign-key";

fn main() {
    env_logger::builder().filter_level(LevelFilter::Debug).init();

    let until = Utc::now() + Duration::hours(1);
    let signed = sign_url("https://cdn.example/dynamic/resize-width-200/o-af-1/image.jpg", KEY, Some(&until))
        .expect("Failed to sign");
    println!("{}", signed);

    let options = verify_url_now(&signed, KEY).expect("Failed to verify");
    println!("valid until {:?}", options.until);
}
