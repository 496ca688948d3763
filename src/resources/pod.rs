//! Pod template pieces shared by the redis StatefulSet and sentinel Deployment.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, ExecAction, PodAffinityTerm, PodAntiAffinity, Probe, ResourceRequirements,
    Toleration, WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;

use crate::crd::{ResourceRequirementsSpec, ResourceSpec};

/// Topology key used to spread pods across nodes.
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

/// Convert CRD tolerations to k8s-openapi Tolerations.
pub fn convert_tolerations(crd_tolerations: &[crate::crd::Toleration]) -> Option<Vec<Toleration>> {
    if crd_tolerations.is_empty() {
        return None;
    }

    Some(
        crd_tolerations
            .iter()
            .map(|t| Toleration {
                key: t.key.clone(),
                operator: t.operator.clone(),
                value: t.value.clone(),
                effect: t.effect.clone(),
                toleration_seconds: t.toleration_seconds,
            })
            .collect(),
    )
}

fn resource_list(spec: &ResourceSpec) -> Option<BTreeMap<String, Quantity>> {
    let mut list = BTreeMap::new();
    if let Some(cpu) = spec.cpu.as_ref().filter(|s| !s.is_empty()) {
        list.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = spec.memory.as_ref().filter(|s| !s.is_empty()) {
        list.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if list.is_empty() { None } else { Some(list) }
}

/// Generate resource requirements, leaving out anything not declared.
pub fn resource_requirements(spec: &ResourceRequirementsSpec) -> Option<ResourceRequirements> {
    let requests = resource_list(&spec.requests);
    let limits = resource_list(&spec.limits);
    if requests.is_none() && limits.is_none() {
        return None;
    }
    Some(ResourceRequirements {
        requests,
        limits,
        ..Default::default()
    })
}

/// Soft anti-affinity spreading pods matching `selector` across nodes.
pub fn soft_anti_affinity(selector: &BTreeMap<String, String>) -> Affinity {
    Affinity {
        pod_anti_affinity: Some(PodAntiAffinity {
            preferred_during_scheduling_ignored_during_execution: Some(vec![
                WeightedPodAffinityTerm {
                    weight: 100,
                    pod_affinity_term: PodAffinityTerm {
                        label_selector: Some(LabelSelector {
                            match_labels: Some(selector.clone()),
                            ..Default::default()
                        }),
                        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
                        ..Default::default()
                    },
                },
            ]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Exec probe running `script` through `sh -c`.
pub fn exec_probe(script: &str) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec!["sh".to_string(), "-c".to_string(), script.to_string()]),
        }),
        initial_delay_seconds: Some(30),
        timeout_seconds: Some(5),
        ..Default::default()
    }
}
