const SHODAN_API_KEY: &str = "SHODAN_API_KEY";

pub fn get_api_key() -> Option<String> {
    let key_from_env = std::env::var(SHODAN_API_KEY);
    key_from_env.ok().filter(|key| !key.trim().is_empty())
}

const SHODAN_STREAM_URL: &str = "SHODAN_STREAM_URL";

const DEFAULT_STREAM_URL: &str = "https://stream.shodan.io";

pub fn get_default_stream_url() -> String {
    let url_from_env = std::env::var(SHODAN_STREAM_URL);
    url_from_env
        .ok()
        .filter(|url| !url.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_STREAM_URL.to_string())
}
