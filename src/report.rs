use serde::Serialize;
use std::collections::BTreeMap;

pub type QuestionGroups = BTreeMap<String, QuestionGroup>;
pub type EvaluationGroups = BTreeMap<String, QuestionGroups>;
pub type SubjectGroups = BTreeMap<String, EvaluationGroups>;

/// `class -> subject -> evaluation -> question -> {stats, items}`, label keyed
/// and sorted so repeated loads render in the same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct GroupedReport {
    pub classes: BTreeMap<String, SubjectGroups>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportItem {
    pub student_id: String,
    pub student: String,
    pub score: Option<f64>,
    pub status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStats {
    pub count: usize,
    pub graded: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    #[serde(skip)]
    sum: f64,
}

impl GroupStats {
    fn add(&mut self, score: Option<f64>) {
        self.count += 1;
        let Some(s) = score else {
            return;
        };
        self.graded += 1;
        self.sum += s;
        self.mean = Some(self.sum / self.graded as f64);
        self.min = Some(self.min.map_or(s, |m| m.min(s)));
        self.max = Some(self.max.map_or(s, |m| m.max(s)));
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionGroup {
    pub stats: GroupStats,
    pub items: Vec<ReportItem>,
}

impl QuestionGroup {
    pub fn push(&mut self, item: ReportItem) {
        self.stats.add(item.score);
        self.items.push(item);
    }
}

impl GroupedReport {
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Group to push into, creating any missing ancestors.
    pub fn group_mut(
        &mut self,
        class: &str,
        subject: &str,
        evaluation: &str,
        question: &str,
    ) -> &mut QuestionGroup {
        self.classes
            .entry(class.to_string())
            .or_default()
            .entry(subject.to_string())
            .or_default()
            .entry(evaluation.to_string())
            .or_default()
            .entry(question.to_string())
            .or_default()
    }

    /// Every group path at depths 1 through 4, parents before children.
    pub fn paths(&self) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        for (class, subjects) in &self.classes {
            out.push(vec![class.clone()]);
            for (subject, evaluations) in subjects {
                out.push(vec![class.clone(), subject.clone()]);
                for (evaluation, questions) in evaluations {
                    out.push(vec![class.clone(), subject.clone(), evaluation.clone()]);
                    for question in questions.keys() {
                        out.push(vec![
                            class.clone(),
                            subject.clone(),
                            evaluation.clone(),
                            question.clone(),
                        ]);
                    }
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, score: Option<f64>) -> ReportItem {
        ReportItem {
            student_id: id.to_string(),
            student: format!("Student {}", id),
            score,
            status: "graded".to_string(),
        }
    }

    #[test]
    fn stats_ignore_ungraded_items_for_mean() {
        let mut g = QuestionGroup::default();
        g.push(item("1", Some(4.0)));
        g.push(item("2", None));
        g.push(item("3", Some(8.0)));
        assert_eq!(g.stats.count, 3);
        assert_eq!(g.stats.graded, 2);
        assert_eq!(g.stats.mean, Some(6.0));
        assert_eq!(g.stats.min, Some(4.0));
        assert_eq!(g.stats.max, Some(8.0));
    }

    #[test]
    fn empty_group_has_no_mean() {
        let mut g = QuestionGroup::default();
        g.push(item("1", None));
        assert_eq!(g.stats.mean, None);
        assert_eq!(g.stats.min, None);
    }

    #[test]
    fn paths_list_parents_before_children() {
        let mut r = GroupedReport::default();
        r.group_mut("ClassA", "Math", "Quiz 1", "Q1").push(item("1", Some(1.0)));
        r.group_mut("ClassB", "Math", "Quiz 1", "Q1").push(item("2", Some(2.0)));

        let paths = r.paths();
        assert_eq!(paths.len(), 8);
        assert_eq!(paths[0], vec!["ClassA".to_string()]);
        assert_eq!(paths[1], vec!["ClassA".to_string(), "Math".to_string()]);
        assert!(paths.contains(&vec!["ClassB".to_string(), "Math".to_string()]));
        assert_eq!(r.classes["ClassB"]["Math"]["Quiz 1"]["Q1"].items.len(), 1);
    }

    #[test]
    fn serializes_as_nested_mapping() {
        let mut r = GroupedReport::default();
        r.group_mut("A", "S", "E", "Q").push(item("1", Some(3.0)));
        let v = serde_json::to_value(&r).expect("serialize");
        assert_eq!(v["A"]["S"]["E"]["Q"]["stats"]["count"], 1);
        assert_eq!(v["A"]["S"]["E"]["Q"]["items"][0]["studentId"], "1");
        assert!(v["A"]["S"]["E"]["Q"]["stats"].get("sum").is_none());
    }
}
