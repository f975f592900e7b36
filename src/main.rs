fn main() -> anyhow::Result<()> {
    stagecoach::run()
}
