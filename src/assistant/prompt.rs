use super::intents::DECLARATIONS;
use crate::dashboard::DashboardView;
use crate::models::ServiceOrder;
use crate::redaction::Redactor;
use crate::session::{ChatMessage, ChatRole};
use std::fmt::Write;

const HISTORY_TURNS: usize = 10;
const CONTEXT_ORDERS: usize = 30;

pub fn order_summary(order: &ServiceOrder, redactor: &Redactor) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Ordem {} ({})", order.order_number, order.status.as_str());
    let _ = writeln!(body, "Cliente: {}", order.client);
    let _ = writeln!(body, "Descrição: {}", order.description);
    let _ = writeln!(body, "Responsável: {}", order.responsible);
    let _ = writeln!(body, "Progresso: {}%", order.progress);
    if let Some(value) = order.value {
        let _ = writeln!(body, "Valor: R$ {:.2}", value);
    }
    if let Some(expected) = &order.expected_delivery_date {
        let _ = writeln!(body, "Entrega prevista: {}", expected.as_str());
    }
    if !order.tasks.is_empty() {
        let _ = writeln!(body, "Tarefas:");
        for task in &order.tasks {
            let _ = writeln!(body, "- [{}] {}", if task.completed { "x" } else { " " }, task.text);
        }
    }
    if !order.comments.is_empty() {
        let _ = writeln!(body, "Comentários:");
        for comment in &order.comments {
            let _ = writeln!(body, "- {} ({}): {}", comment.author, comment.timestamp.as_str(), comment.text);
        }
    }

    format!(
        "Você é o assistente de operações de um estúdio. Resuma em até três frases, em português, \
         a situação da ordem abaixo e o próximo passo recomendado.\n\n{}",
        redactor.redact(&body).content
    )
}

pub fn financial_insight(studio_name: &str, view: &DashboardView, redactor: &Redactor) -> String {
    let mut body = String::new();
    let _ = writeln!(body, "Estúdio: {}", studio_name);
    let _ = writeln!(body, "Valor em aberto: R$ {:.2}", view.kpis.open_value);
    let _ = writeln!(body, "Valor entregue: R$ {:.2}", view.kpis.delivered_value);
    let _ = writeln!(body, "Ordens em andamento: {}", view.kpis.in_progress);
    let _ = writeln!(body, "Ordens atrasadas: {}", view.kpis.overdue);
    let _ = writeln!(body, "Por etapa:");
    for entry in &view.status_breakdown {
        let _ = writeln!(body, "- {}: {}", entry.label, entry.count);
    }
    let series = &view.monthly_series;
    let _ = writeln!(body, "Últimos meses (criadas/entregues/ativas):");
    for (index, label) in series.labels.iter().enumerate() {
        let _ = writeln!(
            body,
            "- {}: {}/{}/{}",
            label,
            series.created.get(index).copied().unwrap_or_default(),
            series.delivered.get(index).copied().unwrap_or_default(),
            series.active.get(index).copied().unwrap_or_default()
        );
    }

    format!(
        "Analise os números do painel abaixo e escreva de dois a quatro insights financeiros \
         objetivos em português, em tópicos.\n\n{}",
        redactor.redact(&body).content
    )
}

pub fn intent_extraction(
    message: &str,
    history: &[ChatMessage],
    orders: &[ServiceOrder],
    redactor: &Redactor,
) -> String {
    let declarations = serde_json::to_string_pretty(&*DECLARATIONS).unwrap_or_else(|_| "[]".to_string());

    let mut context = String::new();
    for order in orders.iter().take(CONTEXT_ORDERS) {
        let _ = writeln!(
            context,
            "- {} | {} | {} | {}",
            order.order_number,
            order.client,
            order.status.as_str(),
            order.responsible
        );
    }

    let mut transcript = String::new();
    let skip = history.len().saturating_sub(HISTORY_TURNS);
    for entry in history.iter().skip(skip) {
        let speaker = match entry.role {
            ChatRole::User => "Usuário",
            ChatRole::Assistant => "Assistente",
        };
        let _ = writeln!(transcript, "{}: {}", speaker, entry.text);
    }
    let _ = writeln!(transcript, "Usuário: {}", message.trim());

    format!(
        "Você ajuda a equipe de um estúdio a operar ordens de serviço. Responda em português. \
         Quando o pedido exigir uma ação, inclua as chamadas em JSON no formato \
         {{\"functionCalls\":[{{\"name\":...,\"args\":{{...}}}}]}} usando apenas estas funções:\n{}\n\n\
         Ordens conhecidas (número | cliente | etapa | responsável):\n{}\n\
         Conversa:\n{}",
        declarations,
        redactor.redact(&context).content,
        redactor.redact(&transcript).content
    )
}
