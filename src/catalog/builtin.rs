//! Stock fleet components

use super::{categories, Component, ResourceRequirements, UNIVERSAL_PLATFORM};
use std::collections::BTreeSet;

fn resources(memory_mb: u64, disk_mb: u64, cpu_cores: u32, ports: &[u16]) -> ResourceRequirements {
    ResourceRequirements {
        min_memory_mb: memory_mb,
        min_disk_mb: disk_mb,
        cpu_cores,
        ports: ports.iter().copied().collect::<BTreeSet<_>>(),
    }
}

pub(super) fn components() -> Vec<Component> {
    vec![
        Component::new("base-system")
            .with_description("Foundation system configuration")
            .with_version("1.4.0")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_category(categories::FOUNDATION)
            .with_priority(100)
            .with_resources(resources(256, 1024, 1, &[])),
        Component::new("network-stack")
            .with_description("Network configuration including Tailscale")
            .with_version("1.2.0")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_requires(["base-system"])
            .with_category(categories::FOUNDATION)
            .with_priority(90)
            .with_resources(resources(128, 256, 1, &[41641])),
        Component::new("python")
            .with_description("Python runtime environment")
            .with_version("3.11")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_requires(["base-system"])
            .with_category(categories::RUNTIME)
            .with_priority(80)
            .with_resources(resources(512, 2048, 1, &[])),
        Component::new("node")
            .with_description("Node.js runtime environment")
            .with_version("20")
            .with_platforms([UNIVERSAL_PLATFORM])
            .with_requires(["base-system"])
            .with_category(categories::RUNTIME)
            .with_priority(70)
            .with_resources(resources(512, 1536, 1, &[])),
        Component::new("ubuntu-docker")
            .with_description("Docker environment for Ubuntu")
            .with_version("24.0")
            .with_platforms(["ubuntu"])
            .with_requires(["base-system"])
            .with_category(categories::RUNTIME)
            .with_priority(60)
            .with_resources(resources(1024, 10240, 2, &[2375])),
        Component::new("macos-api")
            .with_description("macOS API service")
            .with_version("2.1.0")
            .with_platforms(["macos"])
            .with_requires(["python", "base-system"])
            .with_category(categories::SERVICE)
            .with_priority(50)
            .with_resources(resources(512, 512, 1, &[9090])),
        Component::new("macos-tracker")
            .with_description("AI tracking service")
            .with_version("3.0.2")
            .with_platforms(["macos"])
            .with_requires(["python", "base-system", "macos-api"])
            .with_category(categories::SERVICE)
            .with_priority(40)
            .with_resources(resources(2048, 4096, 2, &[8080])),
        Component::new("alpr")
            .with_description("License plate recognition service")
            .with_version("1.0.5")
            .with_platforms(["macos"])
            .with_requires(["python", "base-system"])
            .with_category(categories::SERVICE)
            .with_priority(40)
            .with_resources(resources(2048, 2048, 2, &[8081])),
        Component::new("opi-player")
            .with_description("Media player service for OrangePi")
            .with_version("0.9.1")
            .with_platforms(["orangepi"])
            .with_requires(["base-system", "python"])
            .with_category(categories::SERVICE)
            .with_priority(40)
            .with_resources(resources(512, 1024, 1, &[])),
    ]
}
