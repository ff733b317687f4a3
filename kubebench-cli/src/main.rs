fn main() -> anyhow::Result<()> {
    kubebench_cli::cli::execute()
}
