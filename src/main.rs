//! crossframe-rpc CLI
//!
//! Debugging aid for redirect URLs: build the URLs a caller or responder
//! would navigate to, decode them back, and check configuration files.

use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use crossframe_rpc::logging::{self, LogFormat};
use crossframe_rpc::protocol::url_codec::{self, ReturnAddress};
use crossframe_rpc::protocol::{codec, DeliveryMethod, ErrorInfo, RequestId, ResponseStatus, Value};
use crossframe_rpc::RpcConfig;
use url::Url;

#[derive(Parser)]
#[command(name = "crossframe-rpc")]
#[command(about = "Encode and decode crossframe RPC redirect URLs", version)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the URL that invokes a command on a target page
    EncodeRequest {
        /// Page that handles the command
        #[arg(long)]
        target: String,

        /// Where the reply goes (`<postMessage>` to answer by message)
        #[arg(long)]
        return_url: String,

        /// Command name
        #[arg(long)]
        command: String,

        /// Argument as JSON, repeatable
        #[arg(long = "arg")]
        args: Vec<String>,

        /// Request id (random if omitted)
        #[arg(long)]
        id: Option<RequestId>,

        /// Ask for the reply as a form post
        #[arg(long)]
        post: bool,
    },

    /// Build the URL that carries a reply back to the caller
    EncodeReply {
        #[arg(long)]
        return_url: String,

        #[arg(long)]
        id: RequestId,

        /// Result as JSON, or the error message with --error
        #[arg(long)]
        result: String,

        /// Encode an error reply
        #[arg(long)]
        error: bool,
    },

    /// Decode a request URL as a responder page would
    DecodeRequest {
        url: String,

        /// Referring page
        #[arg(long)]
        referrer: String,

        /// The responder has an opener or parent to answer by message
        #[arg(long)]
        has_peer: bool,
    },

    /// Decode a reply URL as the caller page would
    DecodeResponse {
        url: String,

        #[arg(long)]
        referrer: String,
    },

    /// Validate a configuration file
    CheckConfig { path: PathBuf },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = logging::init(cli.log_format) {
        eprintln!("Error initializing logging: {}", e);
    }

    let result = match cli.command {
        Commands::EncodeRequest {
            target,
            return_url,
            command,
            args,
            id,
            post,
        } => run_encode_request(&target, &return_url, &command, &args, id, post),
        Commands::EncodeReply {
            return_url,
            id,
            result,
            error,
        } => run_encode_reply(&return_url, id, &result, error),
        Commands::DecodeRequest {
            url,
            referrer,
            has_peer,
        } => run_decode_request(&url, &referrer, has_peer),
        Commands::DecodeResponse { url, referrer } => run_decode_response(&url, &referrer),
        Commands::CheckConfig { path } => run_check_config(&path),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn run_encode_request(
    target: &str,
    return_url: &str,
    command: &str,
    args: &[String],
    id: Option<RequestId>,
    post: bool,
) -> Result<(), String> {
    let args = args
        .iter()
        .map(|arg| parse_json(arg))
        .collect::<Result<Vec<Value>, String>>()?;
    let method = if post {
        DeliveryMethod::HttpPost
    } else {
        DeliveryMethod::RedirectGet
    };

    let href = url_codec::prepare_redirect_invocation(
        target,
        id.unwrap_or_else(RequestId::random),
        &ReturnAddress::parse(return_url),
        command,
        &args,
        method,
    )
    .map_err(|e| e.to_string())?;

    println!("{}", href);
    Ok(())
}

fn run_encode_reply(return_url: &str, id: RequestId, result: &str, error: bool) -> Result<(), String> {
    let (status, result) = if error {
        (ResponseStatus::Error, ErrorInfo::new(result).to_value())
    } else {
        (ResponseStatus::Ok, parse_json(result)?)
    };

    let href = url_codec::prepare_redirect_reply(return_url, id, status, &result)
        .map_err(|e| e.to_string())?;
    println!("{}", href);
    Ok(())
}

fn run_decode_request(url: &str, referrer: &str, has_peer: bool) -> Result<(), String> {
    let location = Url::parse(url).map_err(|e| format!("invalid URL: {}", e))?;
    let decoded = url_codec::receive_redirect_command(&location, Some(referrer), has_peer)
        .ok_or_else(|| "no acceptable request in URL".to_string())?;

    let request = &decoded.message;
    print_json(&serde_json::json!({
        "origin": request.origin,
        "id": request.data.id.get(),
        "command": request.data.command,
        "args": request.data.args.iter().map(Value::to_json).collect::<Vec<_>>(),
        "returnURL": request.return_address.as_str(),
        "responseMethod": request.response_method.as_str(),
        "cleaned": decoded.cleaned.as_str(),
    }))
}

fn run_decode_response(url: &str, referrer: &str) -> Result<(), String> {
    let location = Url::parse(url).map_err(|e| format!("invalid URL: {}", e))?;
    let decoded = url_codec::receive_redirect_response(&location, Some(referrer))
        .ok_or_else(|| "no response in URL".to_string())?;

    let response = &decoded.message;
    print_json(&serde_json::json!({
        "origin": response.origin,
        "id": response.data.id.get(),
        "status": response.data.status.as_str(),
        "result": response.data.result.to_json(),
        "cleaned": decoded.cleaned.as_str(),
    }))
}

fn run_check_config(path: &Path) -> Result<(), String> {
    let config = RpcConfig::load(path).map_err(|e| e.to_string())?;

    println!("Configuration valid: {}", path.display());
    println!();
    println!("  Origin policy: {}", config.origin_policy());
    if config.allow_any_origin {
        println!("  WARNING: every origin is accepted");
    }
    match config.post_target_origin() {
        Ok(target) => println!("  Post target: {}", target),
        Err(e) => println!("  Post target: none ({})", e),
    }
    println!("  Preserve requests: {}", config.preserve_requests);
    println!("  Store keys: {}", config.store_keys().registry());
    println!(
        "  Handshake: ping {}ms, connect {}ms, liveness {}ms",
        config.handshake.ping_interval_ms,
        config.handshake.connect_timeout_ms,
        config.handshake.liveness_interval_ms
    );
    Ok(())
}

fn parse_json(text: &str) -> Result<Value, String> {
    codec::parse::<Value>(text).map_err(|e| format!("invalid JSON {:?}: {}", text, e))
}

fn print_json(value: &serde_json::Value) -> Result<(), String> {
    let text = serde_json::to_string_pretty(value).map_err(|e| e.to_string())?;
    println!("{}", text);
    Ok(())
}
