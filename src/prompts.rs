use crate::types::{Snippet, StudentContext};

/// Hard cap on retrieved snippets included in a prompt.
pub const MAX_CONTEXT_SNIPPETS: usize = 5;

/// Per-snippet character budget. Snippets beyond this are cut at the nearest
/// char boundary so the overall prompt size stays bounded.
pub const SNIPPET_CHAR_BUDGET: usize = 800;

pub struct Prompts;

impl Prompts {
    pub const ADVISOR_SYSTEM: &'static str = "You are an academic advisor assistant for university students. \
        Answer questions about courses, prerequisites, degree requirements, and academic planning. \
        Ground your answers in the provided course material when it is available, and say so plainly \
        when it is not. Keep answers concise and concrete.";

    pub const AUTORENAME_1: &'static str = "Create a concise, 3-5 word phrase as a header for the following. Please return only the 3-5 word header and no additional words or characters: \"do I need calc 2 before taking algorithms\"";
    pub const AUTORENAME_2: &'static str = "Algorithms Course Prerequisites";
    pub const AUTORENAME_3: &'static str = "Create a concise, 3-5 word phrase as a header for the following. Please return only the 3-5 word header and no additional words or characters: \"my gpa is 2.9, can I still get into the cs honors track\"";
    pub const AUTORENAME_4: &'static str = "Honors Track GPA Question";
    pub const AUTORENAME_5: &'static str = "Create a concise, 3-5 word phrase as a header for the following. Please return only the 3-5 word header and no additional words or characters: \"which electives count toward the data science minor\"";
    pub const AUTORENAME_6: &'static str = "Data Science Minor Electives";
}

/// Assembles the system prompt sent upstream: the fixed advisor instruction,
/// up to [`MAX_CONTEXT_SNIPPETS`] retrieved snippets, and whichever student
/// context fields are actually present. Absent fields are omitted entirely,
/// never rendered as "null" text.
pub fn build_prompt(snippets: &[Snippet], student: Option<&StudentContext>) -> String {
    let mut prompt = String::from(Prompts::ADVISOR_SYSTEM);

    if !snippets.is_empty() {
        prompt.push_str("\n\nRelevant course material:\n");
        for snippet in snippets.iter().take(MAX_CONTEXT_SNIPPETS) {
            prompt.push_str("- ");
            if !snippet.title.is_empty() {
                prompt.push_str(&snippet.title);
                prompt.push_str(": ");
            }
            prompt.push_str(&truncate_chars(&snippet.content, SNIPPET_CHAR_BUDGET));
            prompt.push('\n');
        }
    }

    if let Some(student) = student {
        let mut fields = Vec::new();
        if let Some(department) = &student.department {
            fields.push(format!("department: {}", department));
        }
        if let Some(year) = student.year {
            fields.push(format!("year: {}", year));
        }
        if let Some(gpa) = student.gpa {
            fields.push(format!("GPA: {:.2}", gpa));
        }
        if !fields.is_empty() {
            prompt.push_str("\nStudent context: ");
            prompt.push_str(&fields.join(", "));
        }
    }

    prompt
}

pub fn truncate_chars(text: &str, budget: usize) -> String {
    if text.chars().count() <= budget {
        return text.to_string();
    }
    text.chars().take(budget).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn omits_absent_student_fields() {
        let student = StudentContext {
            department: Some("Computer Science".to_string()),
            year: None,
            gpa: None,
        };
        let prompt = build_prompt(&[], Some(&student));

        assert!(prompt.contains("department: Computer Science"));
        assert!(!prompt.contains("null"));
        assert!(!prompt.contains("None"));
        assert!(!prompt.contains("year"));
        assert!(!prompt.contains("GPA"));
    }

    #[test]
    fn no_student_context_section_when_all_fields_absent() {
        let student = StudentContext {
            department: None,
            year: None,
            gpa: None,
        };
        let prompt = build_prompt(&[], Some(&student));
        assert!(!prompt.contains("Student context"));
        assert_eq!(prompt, build_prompt(&[], None));
    }

    #[test]
    fn truncates_snippets_to_budget() {
        let snippet = Snippet {
            title: "CS101".to_string(),
            content: "x".repeat(SNIPPET_CHAR_BUDGET * 2),
        };
        let prompt = build_prompt(std::slice::from_ref(&snippet), None);
        let run = prompt.matches('x').count();
        assert_eq!(run, SNIPPET_CHAR_BUDGET);
    }

    #[test]
    fn caps_number_of_snippets() {
        let snippets: Vec<Snippet> = (0..MAX_CONTEXT_SNIPPETS + 3)
            .map(|i| Snippet {
                title: format!("DOC{}", i),
                content: "body".to_string(),
            })
            .collect();
        let prompt = build_prompt(&snippets, None);
        assert!(prompt.contains(&format!("DOC{}", MAX_CONTEXT_SNIPPETS - 1)));
        assert!(!prompt.contains(&format!("DOC{}", MAX_CONTEXT_SNIPPETS)));
    }

    #[test]
    fn truncation_respects_multibyte_boundaries() {
        let snippet = Snippet {
            title: String::new(),
            content: "é".repeat(SNIPPET_CHAR_BUDGET + 10),
        };
        // Must not panic on a non-ASCII boundary.
        let prompt = build_prompt(std::slice::from_ref(&snippet), None);
        assert!(prompt.contains('é'));
    }
}
