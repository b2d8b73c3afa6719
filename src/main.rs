fn main() -> anyhow::Result<()> {
    flow_ar::flow::run()
}
