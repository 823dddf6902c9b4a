//! Prompt templates. All user-facing text is Korean.

use crate::types::SearchDocument;

/// Answer text used whenever generation fails or comes back empty.
pub const APOLOGY: &str =
    "죄송합니다. 지금은 답변을 생성하지 못했습니다. 잠시 후 다시 질문해 주세요.";

const CLASSIFICATION_TEMPLATE: &str = r#"다음을 판단해주세요:
1. 검색 유형:
   - "new_search": 완전히 새로운 교수/연구실 검색
   - "refine_previous": 이전 추천 결과 내에서 추가 필터링
   - "hybrid_search": 이전 결과 + 새로운 검색 병합
   - "general_question": 교수/연구실 추천과 무관한 일반 질문

2. 이유: (한 문장)

JSON 형태로만 응답:
{"type": "...", "reason": "...", "search_needed": true/false}"#;

const RECOMMENDATION_GUIDELINES: &str = "추천 가이드라인:
1. 학생의 관심 분야와 가장 유사한 연구 분야를 가진 교수를 우선 추천
2. 각 추천 교수에 대해 다음 정보를 포함:
   - 교수명과 연구실명
   - 대학명과 학과명
   - 연구 분야와 주요 연구 주제
   - 왜 이 연구실이 적합한지에 대한 구체적인 설명
   - 연락처 정보 (이메일, 전화번호)
3. 2-3개의 연구실을 추천하고, 각각의 장점을 명확히 설명
4. 한국어로 친근하고 도움이 되는 톤으로 답변";

const ADVISORY_INSTRUCTION: &str = "대학원 관련 일반적인 질문에 답변해주세요. \
입학 절차, 연구 생활, 지원 자격 등 다양한 주제에 대해 도움을 드릴 수 있습니다.";

/// Profile cards separated by blank lines.
pub fn format_context(documents: &[SearchDocument]) -> String {
    documents
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn classification_prompt(history: &str, query: &str) -> String {
    format!(
        "이전 대화: {}\n새 질문: {}\n\n{}",
        history, query, CLASSIFICATION_TEMPLATE
    )
}

pub fn recommendation_prompt(documents: &[SearchDocument], query: &str) -> String {
    format!(
        "다음은 대학원 교수진 정보입니다. 학생의 질문에 기반하여 가장 적합한 연구실을 추천해주세요.\n\n\
         교수진 정보:\n{}\n\n학생의 질문: {}\n\n{}\n\n추천:",
        format_context(documents),
        query,
        RECOMMENDATION_GUIDELINES
    )
}

pub fn refine_prompt(documents: &[SearchDocument], query: &str) -> String {
    format!(
        "이전에 추천한 교수진 정보:\n{}\n\n학생의 추가 질문: {}\n\n\
         위 교수진 정보를 바탕으로 추가 질문에 답변해주세요.",
        format_context(documents),
        query
    )
}

pub fn hybrid_prompt(documents: &[SearchDocument], query: &str) -> String {
    format!(
        "관련 교수진 정보:\n{}\n\n학생의 질문: {}\n\n\
         위 정보를 종합하여 가장 적합한 연구실을 추천해주세요.",
        format_context(documents),
        query
    )
}

pub fn general_question_prompt(history: &str, query: &str) -> String {
    format!(
        "대화 맥락: {}\n\n질문: {}\n\n{}",
        history, query, ADVISORY_INSTRUCTION
    )
}

pub fn general_info_prompt(query: &str) -> String {
    format!("{}\n\n질문: {}", ADVISORY_INSTRUCTION, query)
}

pub fn professor_detail_prompt(documents: &[SearchDocument], query: &str) -> String {
    format!(
        "교수진 정보:\n{}\n\n학생의 질문: {}\n\n\
         질문에 언급된 교수님에 대해 위 정보에 있는 내용을 빠짐없이 정리해주세요. \
         연구실, 소속, 연구 분야와 주제, 기술 및 방법, 최근 논문, 진로와 멘토링 정보, \
         연락처를 포함하고, 정보에 없는 내용은 추측하지 마세요.",
        format_context(documents),
        query
    )
}
